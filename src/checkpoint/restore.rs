use crate::events::{DashboardEvent, EventBus};
use crate::metrics::{DerivedMetric, MetricsSource};
use crate::models::{Checkpoint, CheckpointOrigin, RestoreReport, StoredValue};
use crate::storage::keys::{
    COST_OPTIONS_KEY, DASHBOARD_CASH_BALANCE_KEY, DASHBOARD_FINAL_PRODUCT_STOCK_KEY,
    DASHBOARD_RAW_MATERIAL_STOCK_KEY, DASHBOARD_TOTAL_REVENUE_KEY, RESTORE_SOURCE, SYNCHRONIZED_COST_KEY,
};
use crate::storage::{write_json, LocalStore};

/// Writes a checkpoint back into the metric store and the local store, then
/// announces every restored value on the bus.
///
/// Individual write failures are logged and counted; they never abort the
/// remaining steps. Dashboard records carry the checkpoint's own timestamp so
/// that applying the same checkpoint twice leaves identical state.
pub(crate) async fn apply_checkpoint(
    checkpoint: &Checkpoint,
    origin: CheckpointOrigin,
    local: &dyn LocalStore,
    metrics: &dyn MetricsSource,
    bus: &EventBus,
) -> RestoreReport {
    let (metrics_restored, metrics_failed) = restore_metrics(checkpoint, metrics).await;

    restore_dashboard_records(checkpoint, local);

    if let Err(error) = write_json(local, COST_OPTIONS_KEY, &checkpoint.cost_options) {
        tracing::warn!(error = %error, "failed to restore cost options");
    }

    let mut analysis_entries_restored = 0usize;
    for (key, entry) in &checkpoint.tire_analysis_data {
        match write_json(local, key, entry) {
            Ok(()) => analysis_entries_restored += 1,
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "failed to restore tire analysis entry");
            }
        }
    }

    if let Some(cost) = &checkpoint.synchronized_cost {
        if let Err(error) = write_json(local, SYNCHRONIZED_COST_KEY, cost) {
            tracing::warn!(error = %error, "failed to restore synchronized cost");
        }
    }

    broadcast_restore(checkpoint, analysis_entries_restored, bus);

    tracing::info!(
        origin = ?origin,
        metrics_restored,
        metrics_failed,
        analysis_entries_restored,
        checkpoint_source = %checkpoint.source,
        "checkpoint restored"
    );

    RestoreReport {
        restored: metrics_restored > 0,
        metrics_restored,
        metrics_failed,
        analysis_entries_restored,
        origin: Some(origin),
        checkpoint_timestamp: Some(checkpoint.timestamp),
    }
}

async fn restore_metrics(checkpoint: &Checkpoint, metrics: &dyn MetricsSource) -> (usize, usize) {
    let results = tokio::join!(
        metrics.save(DerivedMetric::AverageTireCost, checkpoint.average_tire_cost),
        metrics.save(DerivedMetric::AverageTireProfit, checkpoint.average_tire_profit),
        metrics.save(DerivedMetric::AverageResaleProfit, checkpoint.average_resale_profit),
        metrics.save(
            DerivedMetric::FinalProductStockBalance,
            checkpoint.final_product_stock_balance
        ),
    );

    let outcomes = [
        (DerivedMetric::AverageTireCost, results.0),
        (DerivedMetric::AverageTireProfit, results.1),
        (DerivedMetric::AverageResaleProfit, results.2),
        (DerivedMetric::FinalProductStockBalance, results.3),
    ];

    let mut restored = 0usize;
    let mut failed = 0usize;
    for (metric, outcome) in outcomes {
        match outcome {
            Ok(()) => restored += 1,
            Err(error) => {
                failed += 1;
                tracing::warn!(metric = ?metric, error = %error, "failed to restore derived metric");
            }
        }
    }
    (restored, failed)
}

fn restore_dashboard_records(checkpoint: &Checkpoint, local: &dyn LocalStore) {
    let summary = &checkpoint.dashboard_data;
    let records = [
        (DASHBOARD_CASH_BALANCE_KEY, summary.cash_balance),
        (DASHBOARD_TOTAL_REVENUE_KEY, summary.total_revenue),
        (DASHBOARD_FINAL_PRODUCT_STOCK_KEY, summary.final_product_stock),
        (DASHBOARD_RAW_MATERIAL_STOCK_KEY, summary.raw_material_stock),
    ];

    for (key, value) in records {
        let record = StoredValue {
            value,
            timestamp: checkpoint.timestamp,
            source: RESTORE_SOURCE.to_string(),
        };
        if let Err(error) = write_json(local, key, &record) {
            tracing::warn!(key = %key, error = %error, "failed to restore dashboard record");
        }
    }
}

fn broadcast_restore(checkpoint: &Checkpoint, analysis_entries_restored: usize, bus: &EventBus) {
    let source = || RESTORE_SOURCE.to_string();
    let summary = &checkpoint.dashboard_data;

    bus.publish(DashboardEvent::SystemRestored {
        timestamp: checkpoint.timestamp,
        source: source(),
    });
    bus.publish(DashboardEvent::TireCostUpdated {
        average_cost_per_tire: checkpoint.average_tire_cost,
        source: source(),
    });
    bus.publish(DashboardEvent::TireProfitUpdated {
        average_profit_per_tire: checkpoint.average_tire_profit,
        source: source(),
    });
    bus.publish(DashboardEvent::ResaleProfitUpdated {
        average_resale_profit: checkpoint.average_resale_profit,
        source: source(),
    });
    bus.publish(DashboardEvent::FinalProductStockUpdated {
        balance: checkpoint.final_product_stock_balance,
        source: source(),
    });
    bus.publish(DashboardEvent::CashBalanceUpdated {
        balance: summary.cash_balance,
        source: source(),
    });
    bus.publish(DashboardEvent::RevenueUpdated {
        total_revenue: summary.total_revenue,
        source: source(),
    });
    bus.publish(DashboardEvent::RawMaterialStockUpdated {
        balance: summary.raw_material_stock,
        source: source(),
    });
    bus.publish(DashboardEvent::CostOptionsUpdated {
        options: checkpoint.cost_options,
        source: source(),
    });
    if analysis_entries_restored > 0 {
        bus.publish(DashboardEvent::TireAnalysisRestored {
            count: analysis_entries_restored,
            source: source(),
        });
    }
    if let Some(cost) = &checkpoint.synchronized_cost {
        bus.publish(DashboardEvent::SynchronizedCostRestored {
            cost: cost.clone(),
            source: source(),
        });
    }
    bus.publish(DashboardEvent::ForceRecalculation { source: source() });
}

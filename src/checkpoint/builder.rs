use super::CHECKPOINT_VERSION;
use crate::metrics::{self, MetricsSource};
use crate::models::{Checkpoint, CostOptions, DashboardSummary, SynchronizedCost, TireAnalysisEntry};
use crate::storage::keys::{
    COST_OPTIONS_KEY, DASHBOARD_CASH_BALANCE_KEY, DASHBOARD_FINAL_PRODUCT_STOCK_KEY,
    DASHBOARD_RAW_MATERIAL_STOCK_KEY, DASHBOARD_TOTAL_REVENUE_KEY, SYNCHRONIZED_COST_KEY, TIRE_ANALYSIS_PREFIX,
};
use crate::storage::{read_json, LocalStore};
use chrono::Utc;
use std::collections::BTreeMap;

/// Assembles a snapshot from whatever is currently available. Missing or
/// unreadable pieces fall back to zeros, defaults or empty maps.
pub(crate) async fn build_checkpoint(
    local: &dyn LocalStore,
    metrics_source: &dyn MetricsSource,
    source: &str,
) -> Checkpoint {
    let metrics = metrics::load_all(metrics_source).await;

    Checkpoint {
        timestamp: Utc::now(),
        version: CHECKPOINT_VERSION.to_string(),
        source: source.to_string(),
        average_tire_cost: metrics.average_tire_cost,
        average_tire_profit: metrics.average_tire_profit,
        average_resale_profit: metrics.average_resale_profit,
        final_product_stock_balance: metrics.final_product_stock_balance,
        dashboard_data: read_dashboard_summary(local),
        cost_options: read_cost_options(local),
        tire_analysis_data: collect_tire_analysis(local),
        synchronized_cost: read_json::<SynchronizedCost>(local, SYNCHRONIZED_COST_KEY),
    }
}

pub(crate) fn read_dashboard_summary(local: &dyn LocalStore) -> DashboardSummary {
    DashboardSummary {
        cash_balance: read_stored_number(local, DASHBOARD_CASH_BALANCE_KEY),
        total_revenue: read_stored_number(local, DASHBOARD_TOTAL_REVENUE_KEY),
        final_product_stock: read_stored_number(local, DASHBOARD_FINAL_PRODUCT_STOCK_KEY),
        raw_material_stock: read_stored_number(local, DASHBOARD_RAW_MATERIAL_STOCK_KEY),
    }
}

pub(crate) fn read_cost_options(local: &dyn LocalStore) -> CostOptions {
    read_json::<CostOptions>(local, COST_OPTIONS_KEY).unwrap_or_default()
}

/// Accepts either a `{value, ...}` record or a bare number.
fn read_stored_number(local: &dyn LocalStore, key: &str) -> f64 {
    let Some(record) = read_json::<serde_json::Value>(local, key) else {
        return 0.0;
    };
    let number = match &record {
        serde_json::Value::Object(fields) => fields.get("value").and_then(serde_json::Value::as_f64),
        other => other.as_f64(),
    };
    match number {
        Some(value) if value.is_finite() => value,
        _ => {
            tracing::warn!(key = %key, "dashboard record has no numeric value, using 0");
            0.0
        }
    }
}

fn collect_tire_analysis(local: &dyn LocalStore) -> BTreeMap<String, TireAnalysisEntry> {
    let mut entries = BTreeMap::new();
    for (key, raw) in local.entries_with_prefix(TIRE_ANALYSIS_PREFIX) {
        match serde_json::from_str::<TireAnalysisEntry>(&raw) {
            Ok(entry) => {
                entries.insert(key, entry);
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "skipping unreadable tire analysis entry");
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::{build_checkpoint, read_dashboard_summary};
    use crate::checkpoint::CHECKPOINT_VERSION;
    use crate::metrics::testing::FakeMetrics;
    use crate::metrics::DerivedMetric;
    use crate::models::CostOptions;
    use crate::storage::{LocalStore, MemoryStore};

    #[tokio::test]
    async fn empty_local_store_yields_defaults() {
        let local = MemoryStore::new();
        let metrics = FakeMetrics::default();

        let checkpoint = build_checkpoint(&local, &metrics, "manual").await;
        assert_eq!(checkpoint.version, CHECKPOINT_VERSION);
        assert_eq!(checkpoint.source, "manual");
        assert_eq!(checkpoint.average_tire_cost, 0.0);
        assert_eq!(checkpoint.average_tire_profit, 0.0);
        assert_eq!(checkpoint.average_resale_profit, 0.0);
        assert_eq!(checkpoint.final_product_stock_balance, 0.0);
        assert_eq!(checkpoint.dashboard_data.cash_balance, 0.0);
        assert_eq!(checkpoint.dashboard_data.raw_material_stock, 0.0);
        assert_eq!(checkpoint.cost_options, CostOptions::default());
        assert!(checkpoint.tire_analysis_data.is_empty());
        assert!(checkpoint.synchronized_cost.is_none());
    }

    #[tokio::test]
    async fn unreadable_pieces_are_skipped() {
        let local = MemoryStore::new();
        local.set("dashboard_cashBalance", r#"{"value":500,"source":"widget"}"#).expect("set");
        local.set("dashboard_totalRevenue", "1200").expect("set");
        local.set("dashboard_finalProductStock", "{broken").expect("set");
        local.set("dashboard_rawMaterialStock", r#"{"value":"abc"}"#).expect("set");
        local.set("tireCostOptions", r#"{"includeResaleProducts":true}"#).expect("set");
        local
            .set("tireAnalysis_195_60_15", r#"{"costPerTire":88.5,"quantitySold":3,"note":"kept"}"#)
            .expect("set");
        local.set("tireAnalysis_bad", "not json").expect("set");
        local.set("tireCostManager_synchronizedCost", r#"{"averageCostPerTire":1}"#).expect("set");

        let metrics = FakeMetrics::with(&[(DerivedMetric::AverageTireCost, 102.43)]);
        metrics.fail(DerivedMetric::FinalProductStockBalance);

        let checkpoint = build_checkpoint(&local, &metrics, "auto-timer").await;
        assert_eq!(checkpoint.average_tire_cost, 102.43);
        assert_eq!(checkpoint.final_product_stock_balance, 0.0);
        assert_eq!(checkpoint.dashboard_data.cash_balance, 500.0);
        assert_eq!(checkpoint.dashboard_data.total_revenue, 1200.0);
        assert_eq!(checkpoint.dashboard_data.final_product_stock, 0.0);
        assert_eq!(checkpoint.dashboard_data.raw_material_stock, 0.0);
        assert!(checkpoint.cost_options.include_resale_products);
        assert!(checkpoint.cost_options.include_labor_costs);

        assert_eq!(checkpoint.tire_analysis_data.len(), 1);
        let entry = &checkpoint.tire_analysis_data["tireAnalysis_195_60_15"];
        assert_eq!(entry.cost_per_tire(), 88.5);
        assert_eq!(entry.quantity_sold(), 3.0);
        assert_eq!(entry.field("note"), Some(&serde_json::json!("kept")));

        // timestamp is required on the synchronized cost record
        assert!(checkpoint.synchronized_cost.is_none());
    }

    #[test]
    fn summary_reads_each_record_independently() {
        let local = MemoryStore::new();
        local.set("dashboard_rawMaterialStock", r#"{"value":75.5}"#).expect("set");
        let summary = read_dashboard_summary(&local);
        assert_eq!(summary.raw_material_stock, 75.5);
        assert_eq!(summary.cash_balance, 0.0);
    }
}

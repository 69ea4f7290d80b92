use crate::db::Database;
use crate::errors::AppResult;
use crate::events::{DashboardEvent, EventBus};
use crate::models::{CashFlowKind, DashboardSummary, ItemType, StoredValue};
use crate::storage::keys::{
    DASHBOARD_CASH_BALANCE_KEY, DASHBOARD_FINAL_PRODUCT_STOCK_KEY, DASHBOARD_RAW_MATERIAL_STOCK_KEY,
    DASHBOARD_TOTAL_REVENUE_KEY,
};
use crate::storage::{write_json, LocalStore};
use chrono::Utc;
use std::sync::Arc;

const AGGREGATOR_SOURCE: &str = "DashboardAggregator";

/// Computes the dashboard headline numbers and publishes them where widgets read them.
pub struct DashboardAggregator {
    db: Arc<Database>,
    local: Arc<dyn LocalStore>,
    bus: EventBus,
}

impl DashboardAggregator {
    pub fn new(db: Arc<Database>, local: Arc<dyn LocalStore>, bus: EventBus) -> Self {
        Self { db, local, bus }
    }

    pub async fn compute(&self) -> AppResult<DashboardSummary> {
        let (income, expense, product_stock, material_stock) = tokio::try_join!(
            query(&self.db, |db| db.cash_flow_total(CashFlowKind::Income)),
            query(&self.db, |db| db.cash_flow_total(CashFlowKind::Expense)),
            query(&self.db, |db| db.stock_value(ItemType::Product)),
            query(&self.db, |db| db.stock_value(ItemType::Material)),
        )?;

        Ok(DashboardSummary {
            cash_balance: income - expense,
            total_revenue: income,
            final_product_stock: product_stock,
            raw_material_stock: material_stock,
        })
    }

    pub async fn refresh(&self) -> AppResult<DashboardSummary> {
        let summary = self.compute().await?;
        let timestamp = Utc::now();

        for (key, value) in [
            (DASHBOARD_CASH_BALANCE_KEY, summary.cash_balance),
            (DASHBOARD_TOTAL_REVENUE_KEY, summary.total_revenue),
            (DASHBOARD_FINAL_PRODUCT_STOCK_KEY, summary.final_product_stock),
            (DASHBOARD_RAW_MATERIAL_STOCK_KEY, summary.raw_material_stock),
        ] {
            write_json(
                self.local.as_ref(),
                key,
                &StoredValue {
                    value,
                    timestamp,
                    source: AGGREGATOR_SOURCE.to_string(),
                },
            )?;
        }

        self.bus.publish(DashboardEvent::CashBalanceUpdated {
            balance: summary.cash_balance,
            source: AGGREGATOR_SOURCE.to_string(),
        });
        self.bus.publish(DashboardEvent::RevenueUpdated {
            total_revenue: summary.total_revenue,
            source: AGGREGATOR_SOURCE.to_string(),
        });
        self.bus.publish(DashboardEvent::FinalProductStockUpdated {
            balance: summary.final_product_stock,
            source: AGGREGATOR_SOURCE.to_string(),
        });
        self.bus.publish(DashboardEvent::RawMaterialStockUpdated {
            balance: summary.raw_material_stock,
            source: AGGREGATOR_SOURCE.to_string(),
        });

        tracing::debug!(cash_balance = summary.cash_balance, "dashboard summary refreshed");
        Ok(summary)
    }
}

/// Runs a database read on the blocking pool.
pub(crate) async fn query<T, F>(db: &Arc<Database>, read: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || read(&db)).await?
}

#[cfg(test)]
mod tests {
    use super::DashboardAggregator;
    use crate::checkpoint::read_dashboard_summary;
    use crate::db::Database;
    use crate::events::{drain, EventBus};
    use crate::models::{CashFlowKind, ItemType, NewCashFlowEntry, NewStockItem};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn refresh_writes_records_widgets_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("state.sqlite")).expect("db"));
        let local = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let mut events = bus.subscribe();

        db.insert_cash_flow(&NewCashFlowEntry {
            kind: CashFlowKind::Income,
            category: "sales".to_string(),
            amount: 900.0,
            description: Some("retread batch".to_string()),
        })
        .expect("income");
        db.insert_cash_flow(&NewCashFlowEntry {
            kind: CashFlowKind::Expense,
            category: "energy".to_string(),
            amount: 400.0,
            description: None,
        })
        .expect("expense");
        db.insert_stock_item(&NewStockItem {
            item_type: ItemType::Material,
            name: "tread rubber".to_string(),
            quantity: 10.0,
            unit_cost: 12.5,
        })
        .expect("material");

        let aggregator = DashboardAggregator::new(db, local.clone(), bus);
        let summary = aggregator.refresh().await.expect("refresh");
        assert_eq!(summary.cash_balance, 500.0);
        assert_eq!(summary.total_revenue, 900.0);
        assert_eq!(summary.raw_material_stock, 125.0);
        assert_eq!(summary.final_product_stock, 0.0);

        assert_eq!(read_dashboard_summary(&*local), summary);
        assert_eq!(drain(&mut events).len(), 4);
    }
}

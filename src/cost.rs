use crate::checkpoint::read_cost_options;
use crate::dashboard::query;
use crate::db::Database;
use crate::errors::AppResult;
use crate::events::{DashboardEvent, EventBus};
use crate::metrics::{DerivedMetric, MetricsSource};
use crate::models::{CostOptions, ExpenseBreakdown, ItemType, SynchronizedCost};
use crate::storage::keys::{COST_OPTIONS_KEY, SYNCHRONIZED_COST_KEY};
use crate::storage::{write_json, LocalStore};
use chrono::Utc;
use std::sync::Arc;

const CALCULATOR_SOURCE: &str = "TireCostCalculator";

/// Inputs of one average-cost calculation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostInputs {
    pub product_stock_value: f64,
    pub product_units: f64,
    pub resale_stock_value: f64,
    pub resale_units: f64,
    pub expenses: ExpenseBreakdown,
}

/// Average cost per tire in cents precision; zero when nothing was produced.
pub fn average_cost_per_tire(inputs: &CostInputs, options: &CostOptions) -> f64 {
    let mut total = inputs.product_stock_value;
    let mut units = inputs.product_units;

    if options.include_resale_products {
        total += inputs.resale_stock_value;
        units += inputs.resale_units;
    }
    if options.include_labor_costs {
        total += inputs.expenses.labor;
    }
    if options.include_cash_flow_expenses {
        total += inputs.expenses.other;
    }
    if options.include_production_losses {
        total += inputs.expenses.production_losses;
    }

    if units <= 0.0 {
        return 0.0;
    }
    ((total / units) * 100.0).round() / 100.0
}

pub struct TireCostCalculator {
    db: Arc<Database>,
    local: Arc<dyn LocalStore>,
    metrics: Arc<dyn MetricsSource>,
    bus: EventBus,
}

impl TireCostCalculator {
    pub fn new(
        db: Arc<Database>,
        local: Arc<dyn LocalStore>,
        metrics: Arc<dyn MetricsSource>,
        bus: EventBus,
    ) -> Self {
        Self {
            db,
            local,
            metrics,
            bus,
        }
    }

    pub fn cost_options(&self) -> CostOptions {
        read_cost_options(self.local.as_ref())
    }

    pub fn update_cost_options(&self, options: CostOptions) -> AppResult<()> {
        write_json(self.local.as_ref(), COST_OPTIONS_KEY, &options)?;
        self.bus.publish(DashboardEvent::CostOptionsUpdated {
            options,
            source: CALCULATOR_SOURCE.to_string(),
        });
        Ok(())
    }

    async fn inputs(&self) -> AppResult<CostInputs> {
        let (product_stock_value, product_units, resale_stock_value, resale_units, expenses) = tokio::try_join!(
            query(&self.db, |db| db.stock_value(ItemType::Product)),
            query(&self.db, |db| db.stock_quantity(ItemType::Product)),
            query(&self.db, |db| db.stock_value(ItemType::Resale)),
            query(&self.db, |db| db.stock_quantity(ItemType::Resale)),
            query(&self.db, |db| db.expense_breakdown()),
        )?;
        Ok(CostInputs {
            product_stock_value,
            product_units,
            resale_stock_value,
            resale_units,
            expenses,
        })
    }

    /// Recomputes the average cost, records it as the synchronized cost and
    /// stores it as the `AverageTireCost` metric.
    pub async fn recalculate(&self) -> AppResult<SynchronizedCost> {
        let options = self.cost_options();
        let inputs = self.inputs().await?;
        let average = average_cost_per_tire(&inputs, &options);

        let record = SynchronizedCost {
            average_cost_per_tire: average,
            timestamp: Utc::now(),
            source: CALCULATOR_SOURCE.to_string(),
        };
        write_json(self.local.as_ref(), SYNCHRONIZED_COST_KEY, &record)?;

        if let Err(error) = self.metrics.save(DerivedMetric::AverageTireCost, average).await {
            tracing::warn!(error = %error, "failed to store recalculated tire cost");
        }

        self.bus.publish(DashboardEvent::TireCostUpdated {
            average_cost_per_tire: average,
            source: CALCULATOR_SOURCE.to_string(),
        });
        tracing::info!(average_cost_per_tire = average, "tire cost recalculated");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::{average_cost_per_tire, CostInputs, TireCostCalculator};
    use crate::db::Database;
    use crate::events::EventBus;
    use crate::metrics::testing::FakeMetrics;
    use crate::metrics::DerivedMetric;
    use crate::models::{
        CashFlowKind, CostOptions, ExpenseBreakdown, ItemType, NewCashFlowEntry, NewStockItem, SynchronizedCost,
    };
    use crate::storage::{read_json, MemoryStore};
    use std::sync::Arc;

    fn inputs() -> CostInputs {
        CostInputs {
            product_stock_value: 800.0,
            product_units: 10.0,
            resale_stock_value: 200.0,
            resale_units: 10.0,
            expenses: ExpenseBreakdown {
                labor: 200.0,
                production_losses: 50.0,
                other: 100.0,
            },
        }
    }

    #[test]
    fn toggles_select_cost_components() {
        assert_eq!(average_cost_per_tire(&inputs(), &CostOptions::default()), 115.0);

        let without_labor = CostOptions {
            include_labor_costs: false,
            ..CostOptions::default()
        };
        assert_eq!(average_cost_per_tire(&inputs(), &without_labor), 95.0);

        let with_resale = CostOptions {
            include_resale_products: true,
            ..CostOptions::default()
        };
        assert_eq!(average_cost_per_tire(&inputs(), &with_resale), 67.5);

        assert_eq!(average_cost_per_tire(&CostInputs::default(), &CostOptions::default()), 0.0);
    }

    #[tokio::test]
    async fn recalculate_records_synchronized_cost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("state.sqlite")).expect("db"));
        let local = Arc::new(MemoryStore::new());
        let metrics = Arc::new(FakeMetrics::default());

        db.insert_stock_item(&NewStockItem {
            item_type: ItemType::Product,
            name: "195/60 R15".to_string(),
            quantity: 3.0,
            unit_cost: 100.0,
        })
        .expect("stock");
        db.insert_cash_flow(&NewCashFlowEntry {
            kind: CashFlowKind::Expense,
            category: "labor".to_string(),
            amount: 10.0,
            description: None,
        })
        .expect("labor");

        let calculator = TireCostCalculator::new(db, local.clone(), metrics.clone(), EventBus::new());
        calculator
            .update_cost_options(CostOptions {
                include_production_losses: false,
                ..CostOptions::default()
            })
            .expect("options");
        assert!(!calculator.cost_options().include_production_losses);

        let record = calculator.recalculate().await.expect("recalculate");
        assert_eq!(record.average_cost_per_tire, 103.33);
        assert_eq!(metrics.value(DerivedMetric::AverageTireCost), Some(103.33));

        let stored: SynchronizedCost =
            read_json(&*local, "tireCostManager_synchronizedCost").expect("synchronized cost");
        assert_eq!(stored, record);
    }
}

use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::ItemType;
use crate::remote::SettingsStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Aggregates computed from backend rows and cached as named settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DerivedMetric {
    AverageTireCost,
    AverageTireProfit,
    AverageResaleProfit,
    FinalProductStockBalance,
}

impl DerivedMetric {
    pub const ALL: [DerivedMetric; 4] = [
        Self::AverageTireCost,
        Self::AverageTireProfit,
        Self::AverageResaleProfit,
        Self::FinalProductStockBalance,
    ];

    pub fn settings_key(self) -> &'static str {
        match self {
            Self::AverageTireCost => "average_tire_cost",
            Self::AverageTireProfit => "average_tire_profit",
            Self::AverageResaleProfit => "average_resale_profit",
            Self::FinalProductStockBalance => "final_product_stock_balance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetricValues {
    pub average_tire_cost: f64,
    pub average_tire_profit: f64,
    pub average_resale_profit: f64,
    pub final_product_stock_balance: f64,
}

impl DerivedMetricValues {
    pub fn get(&self, metric: DerivedMetric) -> f64 {
        match metric {
            DerivedMetric::AverageTireCost => self.average_tire_cost,
            DerivedMetric::AverageTireProfit => self.average_tire_profit,
            DerivedMetric::AverageResaleProfit => self.average_resale_profit,
            DerivedMetric::FinalProductStockBalance => self.final_product_stock_balance,
        }
    }
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn load(&self, metric: DerivedMetric) -> AppResult<f64>;
    async fn save(&self, metric: DerivedMetric, value: f64) -> AppResult<()>;
}

/// Loads all four metrics concurrently; each failure degrades to zero.
pub async fn load_all(source: &dyn MetricsSource) -> DerivedMetricValues {
    let (cost, profit, resale, stock) = tokio::join!(
        load_or_zero(source, DerivedMetric::AverageTireCost),
        load_or_zero(source, DerivedMetric::AverageTireProfit),
        load_or_zero(source, DerivedMetric::AverageResaleProfit),
        load_or_zero(source, DerivedMetric::FinalProductStockBalance),
    );
    DerivedMetricValues {
        average_tire_cost: cost,
        average_tire_profit: profit,
        average_resale_profit: resale,
        final_product_stock_balance: stock,
    }
}

async fn load_or_zero(source: &dyn MetricsSource, metric: DerivedMetric) -> f64 {
    match source.load(metric).await {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(metric = ?metric, error = %error, "derived metric unavailable, using 0");
            0.0
        }
    }
}

/// Prefers the value stored under the metric's settings key and falls back
/// to computing it from stock and sales rows.
pub struct DerivedMetricsLoader {
    db: Arc<Database>,
    settings: Arc<dyn SettingsStore>,
}

impl DerivedMetricsLoader {
    pub fn new(db: Arc<Database>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { db, settings }
    }

    pub fn compute(&self, metric: DerivedMetric) -> AppResult<f64> {
        let value = match metric {
            DerivedMetric::AverageTireCost => self.db.average_unit_cost(ItemType::Product)?,
            DerivedMetric::AverageTireProfit => self.db.average_unit_profit(ItemType::Product)?,
            DerivedMetric::AverageResaleProfit => self.db.average_unit_profit(ItemType::Resale)?,
            DerivedMetric::FinalProductStockBalance => Some(self.db.stock_value(ItemType::Product)?),
        };
        Ok(value.unwrap_or(0.0))
    }
}

#[async_trait]
impl MetricsSource for DerivedMetricsLoader {
    async fn load(&self, metric: DerivedMetric) -> AppResult<f64> {
        if let Some(raw) = self.settings.get(metric.settings_key()).await? {
            match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => return Ok(value),
                _ => {
                    tracing::warn!(metric = ?metric, raw = %raw, "stored metric is not a number, recomputing");
                }
            }
        }
        self.compute(metric)
    }

    async fn save(&self, metric: DerivedMetric, value: f64) -> AppResult<()> {
        if !value.is_finite() {
            return Err(AppError::Parse(format!("{:?} must be a finite number", metric)));
        }
        self.settings.put(metric.settings_key(), &value.to_string()).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeMetrics;
    use super::{load_all, DerivedMetric, DerivedMetricsLoader, MetricsSource};
    use crate::db::Database;
    use crate::models::{ItemType, NewSale, NewStockItem};
    use std::sync::Arc;

    fn loader() -> (tempfile::TempDir, Arc<Database>, DerivedMetricsLoader) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("state.sqlite")).expect("db"));
        let loader = DerivedMetricsLoader::new(db.clone(), db.clone());
        (dir, db, loader)
    }

    #[tokio::test]
    async fn computes_from_rows_until_a_value_is_saved() {
        let (_dir, db, loader) = loader();
        db.insert_stock_item(&NewStockItem {
            item_type: ItemType::Product,
            name: "195/60 R15".to_string(),
            quantity: 4.0,
            unit_cost: 90.0,
        })
        .expect("stock");
        db.insert_sale(&NewSale {
            item_type: ItemType::Resale,
            product_name: "valve".to_string(),
            quantity: 10.0,
            unit_price: 3.0,
            unit_cost: 2.0,
        })
        .expect("sale");

        let values = load_all(&loader).await;
        assert_eq!(values.average_tire_cost, 90.0);
        assert_eq!(values.average_tire_profit, 0.0);
        assert_eq!(values.average_resale_profit, 1.0);
        assert_eq!(values.final_product_stock_balance, 360.0);

        loader.save(DerivedMetric::AverageTireCost, 102.43).await.expect("save");
        assert_eq!(loader.load(DerivedMetric::AverageTireCost).await.expect("load"), 102.43);
        assert_eq!(
            db.get_system_setting("average_tire_cost").expect("setting").as_deref(),
            Some("102.43")
        );
    }

    #[tokio::test]
    async fn garbage_setting_falls_back_to_computation() {
        let (_dir, db, loader) = loader();
        db.put_system_setting("final_product_stock_balance", "NaN-ish").expect("put");
        assert_eq!(
            loader.load(DerivedMetric::FinalProductStockBalance).await.expect("load"),
            0.0
        );
        assert!(loader.save(DerivedMetric::AverageTireProfit, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn failing_metric_defaults_to_zero() {
        let fake = FakeMetrics::with(&[
            (DerivedMetric::AverageTireCost, 80.0),
            (DerivedMetric::AverageTireProfit, 25.0),
        ]);
        fake.fail(DerivedMetric::AverageTireProfit);

        let values = load_all(&fake).await;
        assert_eq!(values.get(DerivedMetric::AverageTireCost), 80.0);
        assert_eq!(values.get(DerivedMetric::AverageTireProfit), 0.0);
    }
}

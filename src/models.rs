use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    Material,
    Product,
    Resale,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Material => "material",
            Self::Product => "product",
            Self::Resale => "resale",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "material" => Some(Self::Material),
            "product" => Some(Self::Product),
            "resale" => Some(Self::Resale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CashFlowKind {
    Income,
    Expense,
}

impl CashFlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: String,
    pub item_type: ItemType,
    pub name: String,
    pub quantity: f64,
    pub unit_cost: f64,
    pub total_value: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStockItem {
    pub item_type: ItemType,
    pub name: String,
    pub quantity: f64,
    pub unit_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: String,
    pub item_type: ItemType,
    pub product_name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub unit_cost: f64,
    pub sold_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSale {
    pub item_type: ItemType,
    pub product_name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub unit_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowEntry {
    pub id: String,
    pub kind: CashFlowKind,
    pub category: String,
    pub amount: f64,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCashFlowEntry {
    pub kind: CashFlowKind,
    pub category: String,
    pub amount: f64,
    pub description: Option<String>,
}

/// Expense totals by the categories the cost calculator distinguishes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExpenseBreakdown {
    pub labor: f64,
    pub production_losses: f64,
    pub other: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckpointSettings {
    pub auto_interval_secs: u64,
    pub debounce_ms: u64,
    pub restore_on_startup: bool,
    pub mirror_to_remote: bool,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            auto_interval_secs: 300,
            debounce_ms: 2000,
            restore_on_startup: true,
            mirror_to_remote: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub checkpoint: CheckpointSettings,
}

/// A single dashboard number as widgets keep it in the local store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSummary {
    #[serde(deserialize_with = "null_as_zero")]
    pub cash_balance: f64,
    #[serde(deserialize_with = "null_as_zero")]
    pub total_revenue: f64,
    #[serde(deserialize_with = "null_as_zero")]
    pub final_product_stock: f64,
    #[serde(deserialize_with = "null_as_zero")]
    pub raw_material_stock: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CostOptions {
    pub include_labor_costs: bool,
    pub include_cash_flow_expenses: bool,
    pub include_production_losses: bool,
    pub include_resale_products: bool,
}

impl Default for CostOptions {
    fn default() -> Self {
        Self {
            include_labor_costs: true,
            include_cash_flow_expenses: true,
            include_production_losses: true,
            include_resale_products: false,
        }
    }
}

/// Cached per-product figures exactly as the widget wrote them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct TireAnalysisEntry(Value);

impl TireAnalysisEntry {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Numeric field, 0 when missing, null or not a number.
    pub fn number(&self, name: &str) -> f64 {
        let number = match self.0.get(name) {
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|value| value.is_finite()).unwrap_or(0.0)
    }

    pub fn cost_per_tire(&self) -> f64 {
        self.number("costPerTire")
    }

    pub fn revenue(&self) -> f64 {
        self.number("revenue")
    }

    pub fn quantity_sold(&self) -> f64 {
        self.number("quantitySold")
    }

    pub fn profit(&self) -> f64 {
        self.number("profit")
    }

    pub fn margin(&self) -> f64 {
        self.number("margin")
    }

    /// Accepts RFC 3339 strings and epoch milliseconds.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.0.get("timestamp")? {
            Value::String(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc)),
            Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizedCost {
    pub average_cost_per_tire: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub average_tire_cost: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub average_tire_profit: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub average_resale_profit: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub final_product_stock_balance: f64,
    #[serde(default, deserialize_with = "or_default")]
    pub dashboard_data: DashboardSummary,
    #[serde(default, deserialize_with = "or_default")]
    pub cost_options: CostOptions,
    #[serde(default, deserialize_with = "or_default")]
    pub tire_analysis_data: BTreeMap<String, TireAnalysisEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "or_none")]
    pub synchronized_cost: Option<SynchronizedCost>,
}

fn default_source() -> String {
    "manual".to_string()
}

// Only `timestamp` and `version` are required; every other field falls back to its default.
fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn or_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInfo {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
    pub analysis_entries: usize,
    pub origin: CheckpointOrigin,
}

impl CheckpointInfo {
    pub fn describe(checkpoint: &Checkpoint, origin: CheckpointOrigin) -> Self {
        Self {
            timestamp: checkpoint.timestamp,
            source: checkpoint.source.clone(),
            version: checkpoint.version.clone(),
            analysis_entries: checkpoint.tire_analysis_data.len(),
            origin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored: bool,
    pub metrics_restored: usize,
    pub metrics_failed: usize,
    pub analysis_entries_restored: usize,
    pub origin: Option<CheckpointOrigin>,
    pub checkpoint_timestamp: Option<DateTime<Utc>>,
}

impl RestoreReport {
    pub fn nothing_to_restore() -> Self {
        Self::default()
    }
}

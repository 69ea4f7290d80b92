use once_cell::sync::Lazy;
use regex::Regex;

pub const CHECKPOINT_KEY: &str = "checkpoint_latest";
pub const TIRE_ANALYSIS_PREFIX: &str = "tireAnalysis_";
pub const COST_OPTIONS_KEY: &str = "tireCostOptions";
pub const SYNCHRONIZED_COST_KEY: &str = "tireCostManager_synchronizedCost";

pub const DASHBOARD_CASH_BALANCE_KEY: &str = "dashboard_cashBalance";
pub const DASHBOARD_TOTAL_REVENUE_KEY: &str = "dashboard_totalRevenue";
pub const DASHBOARD_FINAL_PRODUCT_STOCK_KEY: &str = "dashboard_finalProductStock";
pub const DASHBOARD_RAW_MATERIAL_STOCK_KEY: &str = "dashboard_rawMaterialStock";

pub const REMOTE_CHECKPOINT_KEY: &str = "system_checkpoint";

pub const RESTORE_SOURCE: &str = "CheckpointRestore";

static NON_KEY_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"));

/// Local store key for a product's cached analysis, e.g. `195/60 R15` -> `tireAnalysis_195_60_R15`.
pub fn tire_analysis_key(product: &str) -> String {
    let normalized = NON_KEY_CHARS.replace_all(product.trim(), "_");
    format!("{}{}", TIRE_ANALYSIS_PREFIX, normalized.trim_matches('_'))
}

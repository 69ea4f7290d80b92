pub mod checkpoint;
pub mod cost;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod remote;
pub mod storage;

use crate::checkpoint::CheckpointManager;
use crate::cost::TireCostCalculator;
use crate::dashboard::DashboardAggregator;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::events::EventBus;
use crate::lifecycle::{CheckpointIntegration, ImportantEvent, LifecycleConfig};
use crate::metrics::DerivedMetricsLoader;
use crate::models::{
    AppSettings, CashFlowEntry, DashboardSummary, NewCashFlowEntry, NewSale, NewStockItem, SaleRecord, StockItem,
    SynchronizedCost,
};
use crate::remote::RemoteSettings;
use crate::storage::{JsonFileStore, LocalStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const DATA_DIR_ENV: &str = "RETREAD_DATA_DIR";
const DASHBOARD_REFRESH_SECS: u64 = 60;

pub struct App {
    db: Arc<Database>,
    local: Arc<dyn LocalStore>,
    bus: EventBus,
    settings: AppSettings,
    integration: CheckpointIntegration,
    dashboard: DashboardAggregator,
    costs: TireCostCalculator,
}

impl App {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let db = Arc::new(Database::new(&data_dir.join("state.sqlite"))?);
        let local: Arc<dyn LocalStore> = Arc::new(JsonFileStore::open(&data_dir.join("local-store.json"))?);
        Self::with_stores(db, local)
    }

    pub fn with_stores(db: Arc<Database>, local: Arc<dyn LocalStore>) -> AppResult<Self> {
        let settings = db.get_settings()?;
        let bus = EventBus::new();
        let metrics = Arc::new(DerivedMetricsLoader::new(db.clone(), db.clone()));
        let remote = RemoteSettings::new(db.clone());

        let manager = Arc::new(
            CheckpointManager::new(local.clone(), remote, metrics.clone(), bus.clone())
                .with_remote_mirror(settings.checkpoint.mirror_to_remote),
        );
        let integration = CheckpointIntegration::new(manager, LifecycleConfig::from(&settings.checkpoint));
        let dashboard = DashboardAggregator::new(db.clone(), local.clone(), bus.clone());
        let costs = TireCostCalculator::new(db.clone(), local.clone(), metrics, bus.clone());

        Ok(Self {
            db,
            local,
            bus,
            settings,
            integration,
            dashboard,
            costs,
        })
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn local_store(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn integration(&self) -> &CheckpointIntegration {
        &self.integration
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        self.integration.manager()
    }

    pub fn costs(&self) -> &TireCostCalculator {
        &self.costs
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.db.update_settings(update)
    }

    pub fn add_stock_item(&self, item: &NewStockItem) -> AppResult<StockItem> {
        let created = self.db.insert_stock_item(item)?;
        self.integration.notify(ImportantEvent::StockUpdated);
        Ok(created)
    }

    pub fn update_stock_quantity(&self, id: &str, quantity: f64) -> AppResult<StockItem> {
        let updated = self
            .db
            .update_stock_quantity(id, quantity)?
            .ok_or_else(|| AppError::NotFound(format!("stock item {}", id)))?;
        self.integration.notify(ImportantEvent::StockUpdated);
        Ok(updated)
    }

    pub fn record_sale(&self, sale: &NewSale) -> AppResult<SaleRecord> {
        let recorded = self.db.insert_sale(sale)?;
        self.integration.notify(ImportantEvent::StockUpdated);
        Ok(recorded)
    }

    pub fn record_cash_flow(&self, entry: &NewCashFlowEntry) -> AppResult<CashFlowEntry> {
        let recorded = self.db.insert_cash_flow(entry)?;
        self.integration.notify(ImportantEvent::CashFlowUpdated);
        Ok(recorded)
    }

    pub async fn refresh_dashboard(&self) -> AppResult<DashboardSummary> {
        let summary = self.dashboard.refresh().await?;
        self.integration.notify(ImportantEvent::DashboardRefreshed);
        Ok(summary)
    }

    pub async fn recalculate_tire_cost(&self) -> AppResult<SynchronizedCost> {
        let cost = self.costs.recalculate().await?;
        self.integration.notify(ImportantEvent::TireCostRecalculated);
        Ok(cost)
    }
}

pub async fn run() -> AppResult<()> {
    let data_dir = resolve_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    init_tracing(&data_dir)?;

    let app = Arc::new(App::open(&data_dir)?);
    let report = app.integration().initialize().await?;
    tracing::info!(
        data_dir = %data_dir.display(),
        restored = report.restored,
        "dashboard service started"
    );

    let refresher = tokio::spawn({
        let app = app.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(DASHBOARD_REFRESH_SECS));
            loop {
                interval.tick().await;
                if let Err(error) = app.refresh_dashboard().await {
                    tracing::warn!(error = %error, "dashboard refresh failed");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    refresher.abort();

    if let Err(error) = app.integration().before_unload().await {
        tracing::warn!(error = %error, "final checkpoint failed");
    }
    app.integration().shutdown();
    tracing::info!("dashboard service stopped");
    Ok(())
}

fn resolve_data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".retread"))
}

fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

use crate::checkpoint::{
    CheckpointManager, SOURCE_AUTO_TIMER, SOURCE_BEFORE_UNLOAD, SOURCE_EVENT_TRIGGERED, SOURCE_MANUAL,
};
use crate::errors::{AppError, AppResult};
use crate::models::{Checkpoint, CheckpointInfo, CheckpointSettings, RestoreReport};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportantEvent {
    StockUpdated,
    CashFlowUpdated,
    TireCostRecalculated,
    DashboardRefreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
}

pub trait RestoreGate: Send + Sync {
    fn should_restore(&self, info: &CheckpointInfo) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRestore;

impl RestoreGate for AlwaysRestore {
    fn should_restore(&self, _info: &CheckpointInfo) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub auto_interval: Duration,
    pub debounce: Duration,
    pub restore_on_startup: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from(&CheckpointSettings::default())
    }
}

impl From<&CheckpointSettings> for LifecycleConfig {
    fn from(settings: &CheckpointSettings) -> Self {
        Self {
            auto_interval: Duration::from_secs(settings.auto_interval_secs.max(1)),
            debounce: Duration::from_millis(settings.debounce_ms),
            restore_on_startup: settings.restore_on_startup,
        }
    }
}

/// Drives automatic checkpoints: restore at startup, a repeating timer, a
/// shared debounce for important events and a final snapshot on unload.
#[derive(Clone)]
pub struct CheckpointIntegration {
    manager: Arc<CheckpointManager>,
    config: LifecycleConfig,
    gate: Arc<dyn RestoreGate>,
    state: Arc<Mutex<LifecycleState>>,
    runtime: Arc<Mutex<Option<Handle>>>,
    auto_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    debounce: Arc<Mutex<Option<JoinHandle<()>>>>,
    debounce_generation: Arc<AtomicU64>,
    automatic_snapshots: Arc<AtomicUsize>,
}

impl CheckpointIntegration {
    pub fn new(manager: Arc<CheckpointManager>, config: LifecycleConfig) -> Self {
        Self {
            manager,
            config,
            gate: Arc::new(AlwaysRestore),
            state: Arc::new(Mutex::new(LifecycleState::Uninitialized)),
            runtime: Arc::new(Mutex::new(None)),
            auto_timer: Arc::new(Mutex::new(None)),
            debounce: Arc::new(Mutex::new(None)),
            debounce_generation: Arc::new(AtomicU64::new(0)),
            automatic_snapshots: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_restore_gate(mut self, gate: Arc<dyn RestoreGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn manager(&self) -> &Arc<CheckpointManager> {
        &self.manager
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    pub fn automatic_snapshots(&self) -> usize {
        self.automatic_snapshots.load(Ordering::SeqCst)
    }

    pub async fn initialize(&self) -> AppResult<RestoreReport> {
        {
            let mut state = lock(&self.state);
            if *state == LifecycleState::Active {
                return Err(AppError::Internal(
                    "checkpoint integration is already initialized".to_string(),
                ));
            }
            *state = LifecycleState::Active;
        }
        *lock(&self.runtime) = Some(Handle::current());

        let report = if self.config.restore_on_startup {
            self.startup_restore().await
        } else {
            RestoreReport::nothing_to_restore()
        };

        self.arm_auto_timer();

        tracing::info!(
            restored = report.restored,
            interval_secs = self.config.auto_interval.as_secs(),
            debounce_ms = self.config.debounce.as_millis() as u64,
            "checkpoint integration initialized"
        );
        Ok(report)
    }

    async fn startup_restore(&self) -> RestoreReport {
        let Some((checkpoint, origin)) = self.manager.load_checkpoint().await else {
            tracing::info!("no checkpoint found at startup");
            return RestoreReport::nothing_to_restore();
        };
        let info = CheckpointInfo::describe(&checkpoint, origin);
        if !self.gate.should_restore(&info) {
            tracing::info!(checkpoint_source = %info.source, "startup restore declined");
            return RestoreReport::nothing_to_restore();
        }
        self.manager.restore_from(&checkpoint, origin).await
    }

    fn arm_auto_timer(&self) {
        let integration = self.clone();
        let period = self.config.auto_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                integration.take_snapshot(SOURCE_AUTO_TIMER).await;
            }
        });

        if let Some(previous) = lock(&self.auto_timer).replace(handle) {
            previous.abort();
        }
    }

    async fn take_snapshot(&self, source: &str) -> Option<Checkpoint> {
        match self.manager.create_checkpoint(source).await {
            Ok(checkpoint) => {
                self.automatic_snapshots.fetch_add(1, Ordering::SeqCst);
                Some(checkpoint)
            }
            Err(error) => {
                tracing::warn!(source = %source, error = %error, "automatic checkpoint failed");
                None
            }
        }
    }

    /// Restarts the shared debounce; one snapshot follows the last event of a burst.
    pub fn notify(&self, event: ImportantEvent) {
        if self.state() != LifecycleState::Active {
            tracing::debug!(event = ?event, "checkpoint integration inactive, event ignored");
            return;
        }
        // Backend mutators are sync and may run off the runtime.
        let Some(runtime) = lock(&self.runtime).clone() else {
            return;
        };

        let mut pending = lock(&self.debounce);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let integration = self.clone();
        let delay = self.config.debounce;
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                // A newer event owns the slot; let it take the snapshot.
                let mut slot = lock(&integration.debounce);
                if integration.debounce_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                slot.take();
            }
            tracing::debug!(event = ?event, "debounced checkpoint firing");
            integration.take_snapshot(SOURCE_EVENT_TRIGGERED).await;
        }));
    }

    pub async fn before_unload(&self) -> AppResult<Checkpoint> {
        if self.state() != LifecycleState::Active {
            return Err(AppError::Internal("checkpoint integration is not active".to_string()));
        }
        let checkpoint = self.manager.create_checkpoint(SOURCE_BEFORE_UNLOAD).await?;
        self.automatic_snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(checkpoint)
    }

    /// Cancels the repeating timer. Event handling stays armed; see `shutdown`.
    pub fn cleanup(&self) {
        if let Some(handle) = lock(&self.auto_timer).take() {
            handle.abort();
            tracing::info!("checkpoint auto timer stopped");
        }
    }

    pub fn shutdown(&self) {
        self.cleanup();
        if let Some(handle) = lock(&self.debounce).take() {
            handle.abort();
        }
        *lock(&self.state) = LifecycleState::Uninitialized;
        lock(&self.runtime).take();
    }

    pub async fn create_manual_checkpoint(&self) -> AppResult<Checkpoint> {
        self.manager.create_checkpoint(SOURCE_MANUAL).await
    }

    pub async fn restore_manually(&self) -> AppResult<RestoreReport> {
        let report = self.manager.restore().await?;
        if !report.restored {
            return Err(AppError::NotFound("no checkpoint values could be restored".to_string()));
        }
        Ok(report)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

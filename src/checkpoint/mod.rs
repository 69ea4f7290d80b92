//! Snapshot and restore of cached dashboard values.
//!
//! The local store is the source of truth for the latest checkpoint. The
//! remote settings table is a best-effort mirror that is only consulted when
//! the local copy is missing or unreadable, and a hit there re-seeds the local
//! copy. Every write is a blind overwrite: the last checkpoint to land wins.

mod builder;
mod restore;

use crate::errors::{AppError, AppResult};
use crate::events::EventBus;
use crate::metrics::MetricsSource;
use crate::models::{Checkpoint, CheckpointInfo, CheckpointOrigin, RestoreReport};
use crate::remote::RemoteSettings;
use crate::storage::keys::{CHECKPOINT_KEY, REMOTE_CHECKPOINT_KEY};
use crate::storage::{write_json, LocalStore};
use std::sync::Arc;

pub(crate) use builder::{read_cost_options, read_dashboard_summary};

pub const CHECKPOINT_VERSION: &str = "2.0";

pub const SOURCE_MANUAL: &str = "manual";
pub const SOURCE_AUTO_TIMER: &str = "auto-timer";
pub const SOURCE_EVENT_TRIGGERED: &str = "event-triggered";
pub const SOURCE_BEFORE_UNLOAD: &str = "before-unload";

pub struct CheckpointManager {
    local: Arc<dyn LocalStore>,
    remote: RemoteSettings,
    metrics: Arc<dyn MetricsSource>,
    bus: EventBus,
    mirror_to_remote: bool,
}

impl CheckpointManager {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: RemoteSettings,
        metrics: Arc<dyn MetricsSource>,
        bus: EventBus,
    ) -> Self {
        Self {
            local,
            remote,
            metrics,
            bus,
            mirror_to_remote: true,
        }
    }

    pub fn with_remote_mirror(mut self, enabled: bool) -> Self {
        self.mirror_to_remote = enabled;
        self
    }

    /// Builds a snapshot and stores it. Only the local write can fail the call.
    pub async fn create_checkpoint(&self, source: &str) -> AppResult<Checkpoint> {
        let checkpoint = builder::build_checkpoint(self.local.as_ref(), self.metrics.as_ref(), source).await;

        write_json(self.local.as_ref(), CHECKPOINT_KEY, &checkpoint)
            .map_err(|error| AppError::Storage(format!("failed to store checkpoint: {}", error)))?;

        if self.mirror_to_remote {
            match serde_json::to_string(&checkpoint) {
                Ok(raw) => {
                    if !self.remote.save(REMOTE_CHECKPOINT_KEY, &raw).await {
                        tracing::warn!(source = %source, "checkpoint stored locally only");
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "failed to serialize checkpoint for remote mirror");
                }
            }
        }

        tracing::info!(
            source = %source,
            analysis_entries = checkpoint.tire_analysis_data.len(),
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Latest checkpoint, local copy first. A structurally invalid local copy
    /// counts as absent.
    pub async fn load_checkpoint(&self) -> Option<(Checkpoint, CheckpointOrigin)> {
        if let Some(checkpoint) = self.load_local() {
            return Some((checkpoint, CheckpointOrigin::Local));
        }

        let raw = self.remote.load(REMOTE_CHECKPOINT_KEY).await?;
        let checkpoint = match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(checkpoint) => checkpoint,
            Err(error) => {
                tracing::warn!(error = %error, "remote checkpoint is invalid");
                return None;
            }
        };

        if let Err(error) = write_json(self.local.as_ref(), CHECKPOINT_KEY, &checkpoint) {
            tracing::warn!(error = %error, "failed to cache remote checkpoint locally");
        }
        Some((checkpoint, CheckpointOrigin::Remote))
    }

    fn load_local(&self) -> Option<Checkpoint> {
        let raw = self.local.get(CHECKPOINT_KEY)?;
        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(checkpoint) => Some(checkpoint),
            Err(error) => {
                tracing::warn!(error = %error, "local checkpoint is invalid, ignoring it");
                None
            }
        }
    }

    pub async fn restore(&self) -> AppResult<RestoreReport> {
        let Some((checkpoint, origin)) = self.load_checkpoint().await else {
            tracing::info!("no checkpoint to restore");
            return Ok(RestoreReport::nothing_to_restore());
        };

        Ok(self.restore_from(&checkpoint, origin).await)
    }

    /// Applies an already loaded checkpoint.
    pub async fn restore_from(&self, checkpoint: &Checkpoint, origin: CheckpointOrigin) -> RestoreReport {
        restore::apply_checkpoint(checkpoint, origin, self.local.as_ref(), self.metrics.as_ref(), &self.bus).await
    }

    pub async fn has_checkpoint(&self) -> bool {
        self.load_checkpoint().await.is_some()
    }

    pub async fn checkpoint_info(&self) -> Option<CheckpointInfo> {
        let (checkpoint, origin) = self.load_checkpoint().await?;
        Some(CheckpointInfo::describe(&checkpoint, origin))
    }

    /// Removes both copies. Returns whether anything was removed.
    pub async fn clear_checkpoint(&self) -> AppResult<bool> {
        let removed_local = self.local.remove(CHECKPOINT_KEY)?;
        let removed_remote = self.remote.remove(REMOTE_CHECKPOINT_KEY).await;
        tracing::info!(removed_local, removed_remote, "checkpoint cleared");
        Ok(removed_local || removed_remote)
    }
}

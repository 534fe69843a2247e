//! Sync orchestration: run summaries, the process entry point used by
//! schedulers and HTTP handlers, and single-flight protection.

pub mod guard;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::Result;
use crate::phone::{OpenPhoneHttp, PhoneSyncClient};
use crate::store::SyncStore;

pub use guard::{SyncGuard, SyncPermit};

/// A remote record that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSyncError {
    pub record_id: String,
    pub error: String,
}

/// Outcome of syncing one entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySyncResult {
    pub synced: usize,
    pub errors: Vec<RecordSyncError>,
    /// Set when the run was cancelled before every record was processed.
    #[serde(default)]
    pub cancelled: bool,
}

impl EntitySyncResult {
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Default::default()
        }
    }

    /// Some records failed but the phase itself completed.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Result of a full phone sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Completion time of the run
    pub timestamp: DateTime<Utc>,
    pub cancelled: bool,
    pub phone_numbers: EntitySyncResult,
    pub calls: EntitySyncResult,
    pub messages: EntitySyncResult,
}

impl SyncSummary {
    pub fn total_synced(&self) -> usize {
        self.phone_numbers.synced + self.calls.synced + self.messages.synced
    }

    pub fn total_errors(&self) -> usize {
        self.phone_numbers.errors.len() + self.calls.errors.len() + self.messages.errors.len()
    }

    /// True when the dashboard should show a partial-success warning.
    pub fn has_errors(&self) -> bool {
        self.total_errors() > 0
    }
}

/// Run a full phone-provider sync with the configured API key.
///
/// Fails with `Error::Config` before anything is constructed when the key is
/// missing, and with `Error::SyncInProgress` when another run for the same
/// account is still going.
pub async fn trigger_openphone_sync(
    config: &AppConfig,
    store: Arc<dyn SyncStore>,
    cancel: CancellationToken,
) -> Result<SyncSummary> {
    let phone = config.phone_sync_config()?;
    let _permit = SyncGuard::global().try_acquire(&format!("openphone:{}", phone.base_url))?;

    let api = Arc::new(OpenPhoneHttp::new(&phone)?);
    let client = PhoneSyncClient::new(api, store)
        .with_limits(phone.call_limit, phone.message_limit)
        .with_cancellation(cancel);

    info!("Triggered phone sync against {}", phone.base_url);
    client.perform_full_sync().await
}

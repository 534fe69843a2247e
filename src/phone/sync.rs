//! Phone-provider reconciliation: pull calls, messages and lines, resolve the
//! owning client by phone number, and upsert each record independently.

use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::PhoneApi;
use super::models::{record_id, RemoteCall, RemoteMessage, RemotePhoneNumber};
use crate::error::{Error, Result};
use crate::store::SyncStore;
use crate::sync::{EntitySyncResult, RecordSyncError, SyncSummary};
use crate::types::NewClient;

const DEFAULT_LIMIT: u32 = 100;

pub struct PhoneSyncClient {
    api: Arc<dyn PhoneApi>,
    store: Arc<dyn SyncStore>,
    cancel: CancellationToken,
    call_limit: u32,
    message_limit: u32,
}

impl PhoneSyncClient {
    pub fn new(api: Arc<dyn PhoneApi>, store: Arc<dyn SyncStore>) -> Self {
        Self {
            api,
            store,
            cancel: CancellationToken::new(),
            call_limit: DEFAULT_LIMIT,
            message_limit: DEFAULT_LIMIT,
        }
    }

    /// Per-run fetch limits used by [`perform_full_sync`](Self::perform_full_sync).
    pub fn with_limits(mut self, call_limit: u32, message_limit: u32) -> Self {
        self.call_limit = call_limit;
        self.message_limit = message_limit;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Local client id owning `phone_number`, creating a placeholder client on first sight.
    pub fn find_or_create_client(&self, phone_number: &str) -> Result<i64> {
        resolve_client(self.store.as_ref(), phone_number)
    }

    pub async fn sync_calls(&self, limit: u32) -> Result<EntitySyncResult> {
        let records = match self.fetch("calls", self.api.list_calls(limit)).await? {
            Some(records) => records,
            None => return Ok(EntitySyncResult::cancelled()),
        };
        let result = self.reconcile("call", records, sync_call).await;
        info!(
            "Synced {} calls ({} errors)",
            result.synced,
            result.errors.len()
        );
        Ok(result)
    }

    pub async fn sync_messages(&self, limit: u32) -> Result<EntitySyncResult> {
        let records = match self.fetch("messages", self.api.list_messages(limit)).await? {
            Some(records) => records,
            None => return Ok(EntitySyncResult::cancelled()),
        };
        let result = self.reconcile("message", records, sync_message).await;
        info!(
            "Synced {} messages ({} errors)",
            result.synced,
            result.errors.len()
        );
        Ok(result)
    }

    pub async fn sync_phone_numbers(&self) -> Result<EntitySyncResult> {
        let records = match self
            .fetch("phone numbers", self.api.list_phone_numbers())
            .await?
        {
            Some(records) => records,
            None => return Ok(EntitySyncResult::cancelled()),
        };
        let result = self.reconcile("phone number", records, sync_line).await;
        info!(
            "Synced {} phone numbers ({} errors)",
            result.synced,
            result.errors.len()
        );
        Ok(result)
    }

    /// Lines, then calls, then messages. A failed list fetch aborts the run;
    /// per-record failures are reported in the summary.
    pub async fn perform_full_sync(&self) -> Result<SyncSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting phone sync run {}", run_id);

        let phone_numbers = self.sync_phone_numbers().await?;
        let calls = if self.cancel.is_cancelled() {
            EntitySyncResult::cancelled()
        } else {
            self.sync_calls(self.call_limit).await?
        };
        let messages = if self.cancel.is_cancelled() {
            EntitySyncResult::cancelled()
        } else {
            self.sync_messages(self.message_limit).await?
        };

        let summary = SyncSummary {
            run_id,
            started_at,
            timestamp: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            phone_numbers,
            calls,
            messages,
        };
        info!(
            "Phone sync run {} finished: {} records, {} errors{}",
            run_id,
            summary.total_synced(),
            summary.total_errors(),
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    /// Await a list fetch unless the run is cancelled first (`Ok(None)`).
    async fn fetch<F>(&self, entity: &'static str, request: F) -> Result<Option<Vec<Value>>>
    where
        F: Future<Output = Result<Vec<Value>>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Sync of {} cancelled before the list was fetched", entity);
                Ok(None)
            }
            fetched = request => match fetched {
                Ok(records) => {
                    debug!("Fetched {} {}", records.len(), entity);
                    Ok(Some(records))
                }
                Err(e) => {
                    error!("Fetching {} failed; aborting sync run: {}", entity, e);
                    Err(Error::BatchFetch {
                        entity,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    /// Apply `sync_one` to each record in provider order, collecting failures by id.
    ///
    /// Store writes block, so each record runs on the blocking pool and the
    /// cancellation token is checked between records.
    async fn reconcile(
        &self,
        kind: &str,
        records: Vec<Value>,
        sync_one: RecordWriter,
    ) -> EntitySyncResult {
        let mut result = EntitySyncResult::default();
        let total = records.len();
        for (index, record) in records.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    "Sync cancelled after {} of {} {} records",
                    index, total, kind
                );
                result.cancelled = true;
                break;
            }
            let id = record_id(&record);
            let store = Arc::clone(&self.store);
            let outcome = tokio::task::spawn_blocking(move || sync_one(store.as_ref(), record))
                .await
                .unwrap_or_else(|e| {
                    Err(Error::RecordSync {
                        record_id: id.clone(),
                        message: format!("task join error: {}", e),
                    })
                });
            match outcome {
                Ok(()) => result.synced += 1,
                Err(e) => {
                    warn!("Failed to sync {} {}: {}", kind, id, e);
                    result.errors.push(RecordSyncError {
                        record_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }
        result
    }
}

/// Blocking write of one raw provider record.
type RecordWriter = fn(&dyn SyncStore, Value) -> Result<()>;

fn resolve_client(store: &dyn SyncStore, phone_number: &str) -> Result<i64> {
    if let Some(id) = store.find_client_id_by_phone(phone_number)? {
        return Ok(id);
    }
    let id = store.create_client_if_absent(&NewClient::placeholder(phone_number))?;
    info!("Resolved new phone number {} to client {}", phone_number, id);
    Ok(id)
}

fn owner_of(store: &dyn SyncStore, record_id: &str, counterparty: &str) -> Result<i64> {
    if counterparty.trim().is_empty() {
        return Err(Error::RecordSync {
            record_id: record_id.to_string(),
            message: "no counterparty phone number".to_string(),
        });
    }
    resolve_client(store, counterparty)
}

fn sync_call(store: &dyn SyncStore, record: Value) -> Result<()> {
    let remote: RemoteCall = serde_json::from_value(record)?;
    let client_id = owner_of(store, &remote.id, remote.counterparty())?;
    store.upsert_call(&remote.into_call(client_id))?;
    Ok(())
}

fn sync_message(store: &dyn SyncStore, record: Value) -> Result<()> {
    let remote: RemoteMessage = serde_json::from_value(record)?;
    let client_id = owner_of(store, &remote.id, remote.counterparty())?;
    store.upsert_message(&remote.into_message(client_id))?;
    Ok(())
}

fn sync_line(store: &dyn SyncStore, record: Value) -> Result<()> {
    let remote: RemotePhoneNumber = serde_json::from_value(record)?;
    store.upsert_live_line(&remote.into_live_line())?;
    Ok(())
}

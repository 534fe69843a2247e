//! Single-flight lock for sync runs, keyed by provider and account.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct SyncGuard {
    running: Arc<Mutex<HashSet<String>>>,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide guard shared by every entry point.
    pub fn global() -> &'static SyncGuard {
        static GUARD: OnceLock<SyncGuard> = OnceLock::new();
        GUARD.get_or_init(SyncGuard::new)
    }

    /// Claim `key`; the claim is released when the permit drops.
    pub fn try_acquire(&self, key: &str) -> Result<SyncPermit> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(key.to_string()) {
            warn!("Rejected overlapping sync for {}", key);
            return Err(Error::SyncInProgress(key.to_string()));
        }
        debug!("Acquired sync lock for {}", key);
        Ok(SyncPermit {
            key: key.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.running
            .lock()
            .map(|running| running.contains(key))
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct SyncPermit {
    key: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl SyncPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.key);
    }
}

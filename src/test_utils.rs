use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, Result as StoreResult};
use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::phone::PhoneApi;
use crate::store::{SyncStore, TokenStore};
use crate::types::{Call, LiveLine, Message, NewClient, OAuthToken};

/// Global test utilities
///
/// Provides a process-wide mutex to serialize tests that mutate process-wide
/// state (like environment variables). Use this to avoid flaky tests when
/// `cargo test` runs tests in parallel.
pub fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub fn create_test_db() -> crate::persistence::Persistence {
    use tempfile::tempdir;
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.duckdb");
    // Leak the temp dir to keep it alive for the test duration
    std::mem::forget(dir);
    crate::persistence::Persistence::new(&db_path).unwrap()
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, OAuthToken>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: OAuthToken) -> Self {
        let store = Self::default();
        store
            .tokens
            .lock()
            .unwrap()
            .insert(token.realm_id.clone(), token);
        store
    }

    pub fn get(&self, realm_id: &str) -> Option<OAuthToken> {
        self.tokens.lock().unwrap().get(realm_id).cloned()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load_token(&self, realm_id: &str) -> StoreResult<Option<OAuthToken>> {
        Ok(self.get(realm_id))
    }

    fn save_token(&self, token: &OAuthToken) -> StoreResult<()> {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.realm_id.clone(), token.clone());
        Ok(())
    }

    fn delete_token(&self, realm_id: &str) -> StoreResult<bool> {
        Ok(self.tokens.lock().unwrap().remove(realm_id).is_some())
    }
}

/// In-memory sync tables with optional write failures.
#[derive(Debug, Default)]
pub struct MemorySyncStore {
    clients: Mutex<Vec<(i64, NewClient)>>,
    calls: Mutex<HashMap<String, Call>>,
    messages: Mutex<HashMap<String, Message>>,
    lines: Mutex<HashMap<String, LiveLine>>,
    failing_ids: Mutex<HashSet<String>>,
}

impl MemorySyncStore {
    /// Seed an existing client, returning its id.
    pub fn add_client(&self, name: &str, phone: &str) -> i64 {
        self.create_client_if_absent(&NewClient {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: phone.to_string(),
        })
        .unwrap()
    }

    /// Make upserts of the record with this id fail.
    pub fn fail_upserts_for(&self, record_id: &str) {
        self.failing_ids
            .lock()
            .unwrap()
            .insert(record_id.to_string());
    }

    pub fn client_id_for(&self, phone: &str) -> Option<i64> {
        self.find_client_id_by_phone(phone).unwrap()
    }

    pub fn client(&self, id: i64) -> Option<NewClient> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .find(|(client_id, _)| *client_id == id)
            .map(|(_, client)| client.clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn call(&self, id: &str) -> Option<Call> {
        self.calls.lock().unwrap().get(id).cloned()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.messages.lock().unwrap().get(id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn live_line(&self, call_id: &str) -> Option<LiveLine> {
        self.lines.lock().unwrap().get(call_id).cloned()
    }

    fn check_failure(&self, record_id: &str) -> StoreResult<()> {
        if self.failing_ids.lock().unwrap().contains(record_id) {
            return Err(anyhow!("simulated write failure for {}", record_id));
        }
        Ok(())
    }
}

impl SyncStore for MemorySyncStore {
    fn find_client_id_by_phone(&self, phone: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .clients
            .lock()
            .unwrap()
            .iter()
            .find(|(_, client)| client.phone == phone)
            .map(|(id, _)| *id))
    }

    fn create_client_if_absent(&self, client: &NewClient) -> StoreResult<i64> {
        let mut clients = self.clients.lock().unwrap();
        if let Some((id, _)) = clients.iter().find(|(_, c)| c.phone == client.phone) {
            return Ok(*id);
        }
        let id = clients.len() as i64 + 1;
        clients.push((id, client.clone()));
        Ok(id)
    }

    fn upsert_call(&self, call: &Call) -> StoreResult<()> {
        self.check_failure(&call.id)?;
        self.calls
            .lock()
            .unwrap()
            .insert(call.id.clone(), call.clone());
        Ok(())
    }

    fn upsert_message(&self, message: &Message) -> StoreResult<()> {
        self.check_failure(&message.id)?;
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    fn upsert_live_line(&self, line: &LiveLine) -> StoreResult<()> {
        self.check_failure(&line.call_id)?;
        self.lines
            .lock()
            .unwrap()
            .insert(line.call_id.clone(), line.clone());
        Ok(())
    }
}

/// Canned provider responses.
#[derive(Debug, Default)]
pub struct FakePhoneApi {
    pub calls: Vec<Value>,
    pub messages: Vec<Value>,
    pub phone_numbers: Vec<Value>,
    /// Fail the call listing with a 503.
    pub fail_calls: bool,
    pub requests: AtomicUsize,
}

impl FakePhoneApi {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhoneApi for FakePhoneApi {
    async fn list_calls(&self, limit: u32) -> Result<Vec<Value>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_calls {
            return Err(Error::Api {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(self.calls.iter().take(limit as usize).cloned().collect())
    }

    async fn list_messages(&self, limit: u32) -> Result<Vec<Value>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.messages.iter().take(limit as usize).cloned().collect())
    }

    async fn list_phone_numbers(&self) -> Result<Vec<Value>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.phone_numbers.clone())
    }
}

//! Storage seams consumed by the provider clients.
//!
//! `Persistence` implements both traits against DuckDB. Tests substitute
//! fakes to simulate store failures.

use anyhow::Result;

use crate::types::{Call, LiveLine, Message, NewClient, OAuthToken};

/// Per-realm OAuth credential storage. Writes are upserts keyed on `realm_id`.
pub trait TokenStore: Send + Sync {
    fn load_token(&self, realm_id: &str) -> Result<Option<OAuthToken>>;
    fn save_token(&self, token: &OAuthToken) -> Result<()>;
    fn delete_token(&self, realm_id: &str) -> Result<bool>;
}

/// Local tables written by the phone sync.
pub trait SyncStore: Send + Sync {
    fn find_client_id_by_phone(&self, phone: &str) -> Result<Option<i64>>;

    /// Insert the client unless one with the same phone exists, returning
    /// the id of whichever row owns the phone afterwards.
    fn create_client_if_absent(&self, client: &NewClient) -> Result<i64>;

    fn upsert_call(&self, call: &Call) -> Result<()>;
    fn upsert_message(&self, message: &Message) -> Result<()>;
    fn upsert_live_line(&self, line: &LiveLine) -> Result<()>;
}

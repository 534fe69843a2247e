//! Error taxonomy for the provider clients and sync runs.

use thiserror::Error;

/// Errors surfaced by the ledger and phone integrations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required credential or setting is missing or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// The provider rejected an OAuth exchange, refresh or revoke
    #[error("authorization failed ({status}): {body}")]
    Auth { status: u16, body: String },

    /// An authenticated API request returned a non-success status
    #[error("API request failed ({status}): {body}")]
    Api { status: u16, body: String },

    /// A single remote record could not be reconciled
    #[error("record {record_id} failed to sync: {message}")]
    RecordSync { record_id: String, message: String },

    /// The initial list fetch for a sync phase failed
    #[error("fetching {entity} from provider failed: {source}")]
    BatchFetch {
        entity: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Another run for the same provider account holds the sync lock
    #[error("a sync for {0} is already running")]
    SyncInProgress(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The signal callers use to send the user back through the consent flow.
    pub fn not_authenticated(realm_id: &str) -> Self {
        Error::Auth {
            status: 401,
            body: format!("no valid credentials for realm {realm_id}; re-authenticate with QuickBooks"),
        }
    }

    /// True for errors that the UI should render as a blocking "connect again" prompt.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Error::Auth { .. }) || matches!(self, Error::Api { status: 401, .. })
    }
}

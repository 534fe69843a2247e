use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OAuth credentials for one connected ledger company ("realm").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub realm_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthToken {
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_expires_at
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub quickbooks_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl NewClient {
    /// Placeholder client for a phone number first seen in call or message traffic.
    pub fn placeholder(phone: &str) -> Self {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let local = if digits.is_empty() {
            "unknown".to_string()
        } else {
            digits
        };
        Self {
            name: format!("Customer {}", phone),
            email: format!("{}@placeholder.local", local),
            phone: phone.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    #[serde(alias = "incoming")]
    Inbound,
    #[serde(alias = "outgoing")]
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "outbound" | "outgoing" => CallDirection::Outbound,
            _ => CallDirection::Inbound,
        }
    }
}

/// A call row, keyed by the phone provider's call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub client_id: i64,
    pub direction: CallDirection,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: i64,
    pub status: String,
    pub from_number: String,
    pub to_number: String,
    pub recording_url: Option<String>,
}

/// A text message row, keyed by the phone provider's message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub client_id: i64,
    pub direction: CallDirection,
    pub content: String,
    pub status: String,
    pub from_number: String,
    pub to_number: String,
    pub sent_at: DateTime<Utc>,
}

/// Maps the provider's delivery vocabulary onto the dashboard's.
pub fn local_message_status(provider_status: &str) -> String {
    match provider_status {
        "delivered" => "sent".to_string(),
        other => other.to_string(),
    }
}

/// A phone line from the provider inventory, stored in `live_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveLine {
    pub call_id: String,
    pub phone_number: Option<String>,
    pub name: Option<String>,
    pub details: serde_json::Value,
}

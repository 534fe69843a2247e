//! Phone provider records and their mapping onto local rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::{local_message_status, Call, CallDirection, LiveLine, Message};

/// Numbers arrive either as a single string or as a list of participants.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn first_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<OneOrMany> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(OneOrMany::One(number)) => number,
        Some(OneOrMany::Many(numbers)) => numbers.into_iter().next().unwrap_or_default(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCall {
    pub id: String,
    pub direction: CallDirection,
    #[serde(default, deserialize_with = "first_number")]
    pub from: String,
    #[serde(default, deserialize_with = "first_number")]
    pub to: String,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub recording: Option<Recording>,
}

impl RemoteCall {
    /// The number on the far side of the call: caller for inbound, callee for outbound.
    pub fn counterparty(&self) -> &str {
        match self.direction {
            CallDirection::Inbound => &self.from,
            CallDirection::Outbound => &self.to,
        }
    }

    pub fn into_call(self, client_id: i64) -> Call {
        Call {
            client_id,
            direction: self.direction,
            start_time: self.created_at,
            // Calls still in progress have no completion time yet.
            end_time: self.completed_at.unwrap_or(self.created_at),
            duration: self.duration.unwrap_or(0),
            status: self.status,
            recording_url: self.recording.and_then(|r| r.url),
            from_number: self.from,
            to_number: self.to,
            id: self.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: String,
    pub direction: CallDirection,
    #[serde(default, deserialize_with = "first_number")]
    pub from: String,
    #[serde(default, deserialize_with = "first_number")]
    pub to: String,
    #[serde(default, alias = "text")]
    pub body: String,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl RemoteMessage {
    pub fn counterparty(&self) -> &str {
        match self.direction {
            CallDirection::Inbound => &self.from,
            CallDirection::Outbound => &self.to,
        }
    }

    pub fn into_message(self, client_id: i64) -> Message {
        Message {
            client_id,
            direction: self.direction,
            content: self.body,
            status: local_message_status(&self.status),
            from_number: self.from,
            to_number: self.to,
            sent_at: self.created_at,
            id: self.id,
        }
    }
}

/// A line from the provider's phone-number inventory. Unknown fields are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePhoneNumber {
    pub id: String,
    #[serde(default, alias = "number")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemotePhoneNumber {
    pub fn into_live_line(self) -> LiveLine {
        LiveLine {
            call_id: self.id,
            phone_number: self.phone_number,
            name: self.name,
            details: Value::Object(self.extra),
        }
    }
}

/// Best-effort id of a raw record, used to tag failures.
pub fn record_id(record: &Value) -> String {
    match record.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "<unknown>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_call_resolves_caller() {
        let call: RemoteCall = serde_json::from_value(json!({
            "id": "AC1",
            "direction": "incoming",
            "from": "+15550001111",
            "to": ["+15559990000"],
            "status": "completed",
            "createdAt": "2024-05-01T10:00:00Z",
            "completedAt": "2024-05-01T10:03:00Z",
            "duration": 180,
            "recording": {"url": "https://files.example/rec.mp3"}
        }))
        .unwrap();
        assert_eq!(call.counterparty(), "+15550001111");
        assert_eq!(call.to, "+15559990000");

        let row = call.into_call(7);
        assert_eq!(row.client_id, 7);
        assert_eq!(row.duration, 180);
        assert_eq!(row.recording_url.as_deref(), Some("https://files.example/rec.mp3"));
        assert_eq!(row.end_time.to_rfc3339(), "2024-05-01T10:03:00+00:00");
    }

    #[test]
    fn open_call_falls_back_to_start_time_and_zero_duration() {
        let call: RemoteCall = serde_json::from_value(json!({
            "id": "AC2",
            "direction": "outbound",
            "from": "+15559990000",
            "to": "+15550002222",
            "status": "in-progress",
            "createdAt": "2024-05-01T11:00:00Z"
        }))
        .unwrap();
        assert_eq!(call.counterparty(), "+15550002222");
        let row = call.into_call(1);
        assert_eq!(row.end_time, row.start_time);
        assert_eq!(row.duration, 0);
        assert!(row.recording_url.is_none());
    }

    #[test]
    fn message_status_and_body_are_mapped() {
        let message: RemoteMessage = serde_json::from_value(json!({
            "id": "MS1",
            "direction": "outgoing",
            "from": "+15559990000",
            "to": ["+15550003333"],
            "text": "Your appointment is confirmed",
            "status": "delivered",
            "createdAt": "2024-05-02T09:30:00Z"
        }))
        .unwrap();
        let row = message.into_message(3);
        assert_eq!(row.status, "sent");
        assert_eq!(row.content, "Your appointment is confirmed");
        assert_eq!(row.to_number, "+15550003333");
    }

    #[test]
    fn phone_number_keeps_extra_fields() {
        let number: RemotePhoneNumber = serde_json::from_value(json!({
            "id": "PN1",
            "number": "+15559990000",
            "name": "Front desk",
            "forward": null,
            "users": [{"id": "US1"}]
        }))
        .unwrap();
        let line = number.into_live_line();
        assert_eq!(line.call_id, "PN1");
        assert_eq!(line.phone_number.as_deref(), Some("+15559990000"));
        assert_eq!(line.details["users"][0]["id"], "US1");
        assert!(line.details.get("id").is_none());
    }

    #[test]
    fn record_id_handles_missing_ids() {
        assert_eq!(record_id(&json!({"id": "AC9"})), "AC9");
        assert_eq!(record_id(&json!({"id": 12})), "12");
        assert_eq!(record_id(&json!({})), "<unknown>");
    }
}

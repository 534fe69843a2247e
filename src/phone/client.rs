//! OpenPhone REST transport.

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;
use tracing::debug;

use crate::config::PhoneSyncConfig;
use crate::error::{Error, Result};

/// Listing endpoints of the phone provider. Records are returned raw so a
/// single malformed entry can be rejected without failing the whole list.
#[async_trait]
pub trait PhoneApi: Send + Sync {
    async fn list_calls(&self, limit: u32) -> Result<Vec<Value>>;
    async fn list_messages(&self, limit: u32) -> Result<Vec<Value>>;
    async fn list_phone_numbers(&self) -> Result<Vec<Value>>;
}

/// HTTP implementation authenticated with the account API key.
#[derive(Debug, Clone)]
pub struct OpenPhoneHttp {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenPhoneHttp {
    pub fn new(config: &PhoneSyncConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("phone API key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get_list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            // The provider expects the bare key, without a Bearer prefix.
            .header(header::AUTHORIZATION, &self.api_key)
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        unwrap_list(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl PhoneApi for OpenPhoneHttp {
    async fn list_calls(&self, limit: u32) -> Result<Vec<Value>> {
        self.get_list("/calls", &[("limit", limit.to_string())]).await
    }

    async fn list_messages(&self, limit: u32) -> Result<Vec<Value>> {
        self.get_list("/messages", &[("limit", limit.to_string())])
            .await
    }

    async fn list_phone_numbers(&self) -> Result<Vec<Value>> {
        self.get_list("/phone-numbers", &[]).await
    }
}

/// Accepts both the `{"data": [...]}` envelope and a bare array.
fn unwrap_list(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(Error::Api {
                status: 200,
                body: format!("expected a list under \"data\", got {}", other),
            }),
        },
        other => Err(Error::Api {
            status: 200,
            body: format!("unexpected list response: {}", other),
        }),
    }
}

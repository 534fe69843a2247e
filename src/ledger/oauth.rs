//! Ledger OAuth Client
//!
//! Authorization-code and refresh-token grants against the QuickBooks identity
//! service, credential persistence through a [`TokenStore`], and bearer-authenticated
//! request execution against the accounting API.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Method};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::LedgerAuthConfig;
use crate::error::{Error, Result};
use crate::store::TokenStore;
use crate::types::OAuthToken;

/// Refresh token lifetime the provider documents when it omits the field (100 days).
const DEFAULT_REFRESH_EXPIRES_IN: i64 = 8_726_400;

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    #[serde(default = "default_refresh_expires_in")]
    x_refresh_token_expires_in: i64,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

fn default_refresh_expires_in() -> i64 {
    DEFAULT_REFRESH_EXPIRES_IN
}

impl TokenResponse {
    fn into_token(self, realm_id: &str, issued_at: DateTime<Utc>) -> OAuthToken {
        OAuthToken {
            realm_id: realm_id.to_string(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            access_expires_at: issued_at + Duration::seconds(self.expires_in),
            refresh_expires_at: issued_at + Duration::seconds(self.x_refresh_token_expires_in),
            updated_at: issued_at,
        }
    }
}

/// Method, query parameters and JSON body for an authenticated API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

impl Default for ApiRequest {
    fn default() -> Self {
        Self::get()
    }
}

/// OAuth2 client for one ledger application.
pub struct LedgerOAuthClient {
    config: LedgerAuthConfig,
    store: Arc<dyn TokenStore>,
    http: reqwest::Client,
    /// One async lock per realm so concurrent callers refresh at most once.
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LedgerOAuthClient {
    pub fn new(config: LedgerAuthConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            store,
            http,
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &LedgerAuthConfig {
        &self.config
    }

    /// Consent-screen URL the user is redirected to. Pure construction.
    pub fn authorization_url(&self, state: Option<&str>) -> String {
        let mut url = format!(
            "{}?client_id={}&scope={}&redirect_uri={}&response_type=code",
            self.config.endpoints.authorization,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.scope),
            urlencoding::encode(&self.config.redirect_uri),
        );
        if let Some(state) = state {
            url.push_str(&format!("&state={}", urlencoding::encode(state)));
        }
        url
    }

    /// Exchange an authorization code and persist the issued tokens under `realm_id`.
    pub async fn exchange_code_for_tokens(&self, code: &str, realm_id: &str) -> Result<OAuthToken> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let token = self.request_tokens(&params, realm_id).await?;
        info!("Stored new ledger credentials for realm {}", realm_id);
        Ok(token)
    }

    /// Trade a refresh token for a new token pair and persist it.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        realm_id: &str,
    ) -> Result<OAuthToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let token = self.request_tokens(&params, realm_id).await?;
        info!(
            "Refreshed ledger access token for realm {} (expires {})",
            realm_id,
            token.access_expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(token)
    }

    async fn request_tokens(&self, params: &[(&str, &str)], realm_id: &str) -> Result<OAuthToken> {
        let response = self
            .http
            .post(&self.config.endpoints.token)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response.json().await?;
        let token = body.into_token(realm_id, Utc::now());
        // Persist before handing the token back so a successful return implies durable credentials.
        self.save_token(token.clone()).await?;
        Ok(token)
    }

    async fn load_token(&self, realm_id: &str) -> Result<Option<OAuthToken>> {
        let store = Arc::clone(&self.store);
        let realm_id = realm_id.to_string();
        let token = tokio::task::spawn_blocking(move || store.load_token(&realm_id))
            .await
            .context("task join error")??;
        Ok(token)
    }

    async fn save_token(&self, token: OAuthToken) -> Result<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save_token(&token))
            .await
            .context("task join error")??;
        Ok(())
    }

    /// Credentials for `realm_id`, refreshed transparently when the access token expired.
    ///
    /// Returns `Ok(None)` when the realm was never connected, when its refresh
    /// token has lapsed, or when the provider rejects the refresh. All three
    /// mean the user has to go through the consent flow again.
    pub async fn get_stored_tokens(&self, realm_id: &str) -> Result<Option<OAuthToken>> {
        let token = match self.load_token(realm_id).await? {
            Some(token) => token,
            None => return Ok(None),
        };
        if !token.is_access_expired(Utc::now()) {
            return Ok(Some(token));
        }

        let lock = self.refresh_lock(realm_id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_if_expired(realm_id).await
        };
        self.release_refresh_lock(realm_id, lock);
        result
    }

    /// Refresh the realm's tokens regardless of access token expiry.
    ///
    /// Fails with the not-authenticated error when nothing usable is stored.
    pub async fn force_refresh(&self, realm_id: &str) -> Result<OAuthToken> {
        let lock = self.refresh_lock(realm_id);
        let result = {
            let _guard = lock.lock().await;
            match self.load_token(realm_id).await {
                Ok(Some(token)) if !token.is_refresh_expired(Utc::now()) => {
                    self.refresh_access_token(&token.refresh_token, realm_id)
                        .await
                }
                Ok(_) => Err(Error::not_authenticated(realm_id)),
                Err(e) => Err(e),
            }
        };
        self.release_refresh_lock(realm_id, lock);
        result
    }

    // Caller holds the realm's refresh lock.
    async fn refresh_if_expired(&self, realm_id: &str) -> Result<Option<OAuthToken>> {
        // Re-read under the lock: a concurrent caller may already have refreshed.
        let token = match self.load_token(realm_id).await? {
            Some(token) => token,
            None => return Ok(None),
        };
        let now = Utc::now();
        if !token.is_access_expired(now) {
            debug!("Access token for realm {} refreshed by another caller", realm_id);
            return Ok(Some(token));
        }
        if token.is_refresh_expired(now) {
            warn!("Refresh token for realm {} has expired; re-authorization required", realm_id);
            return Ok(None);
        }

        match self.refresh_access_token(&token.refresh_token, realm_id).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(Error::Auth { status, body }) => {
                warn!(
                    "Provider rejected refresh for realm {} ({}): {}",
                    realm_id, status, body
                );
                Ok(None)
            }
            Err(e) => {
                error!("Unexpected failure refreshing realm {}: {}", realm_id, e);
                Err(e)
            }
        }
    }

    fn refresh_lock(&self, realm_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(realm_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the realm's lock entry once no other caller holds or awaits it.
    fn release_refresh_lock(&self, realm_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference lives in the map, the other is ours.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(realm_id);
        }
    }

    /// Base URL for a realm's accounting API.
    pub fn company_url(&self, realm_id: &str) -> String {
        format!(
            "{}/v3/company/{}",
            self.config.endpoints.api_base.trim_end_matches('/'),
            realm_id
        )
    }

    /// Issue a bearer-authenticated request. `endpoint` is appended to the
    /// realm's company URL and may already carry a query string.
    pub async fn make_api_request(
        &self,
        endpoint: &str,
        access_token: &str,
        realm_id: &str,
        request: ApiRequest,
    ) -> Result<Value> {
        let url = format!("{}{}", self.company_url(realm_id), endpoint);
        debug!("{} {}", request.method, url);

        let mut builder = self
            .http
            .request(request.method, &url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Revoke an access or refresh token at the provider.
    pub async fn revoke_tokens(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.config.endpoints.revoke)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header(header::ACCEPT, "application/json")
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Revoke the realm's refresh token and forget the stored credentials.
    /// Returns `false` when nothing was stored.
    pub async fn disconnect(&self, realm_id: &str) -> Result<bool> {
        let token = match self.load_token(realm_id).await? {
            Some(token) => token,
            None => return Ok(false),
        };
        self.revoke_tokens(&token.refresh_token).await?;
        let store = Arc::clone(&self.store);
        let realm = realm_id.to_string();
        tokio::task::spawn_blocking(move || store.delete_token(&realm))
            .await
            .context("task join error")??;
        info!("Disconnected ledger realm {}", realm_id);
        Ok(true)
    }
}

//! Ledger API Client
//!
//! Typed reads and writes over the accounting API. Every call resolves the
//! realm's access token through [`LedgerOAuthClient::get_stored_tokens`] and
//! delegates to [`LedgerOAuthClient::make_api_request`]. No retries happen here.

use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::models::{Account, CompanyInfo, Customer, Invoice, Item, Payment, VersionToken};
use super::oauth::{ApiRequest, LedgerOAuthClient};
use crate::error::{Error, Result};

/// Page size used for list queries.
const MAX_RESULTS: u32 = 1000;

pub struct LedgerApiClient {
    oauth: Arc<LedgerOAuthClient>,
}

impl LedgerApiClient {
    pub fn new(oauth: Arc<LedgerOAuthClient>) -> Self {
        Self { oauth }
    }

    pub fn oauth(&self) -> &Arc<LedgerOAuthClient> {
        &self.oauth
    }

    async fn access_token(&self, realm_id: &str) -> Result<String> {
        self.oauth
            .get_stored_tokens(realm_id)
            .await?
            .map(|token| token.access_token)
            .ok_or_else(|| Error::not_authenticated(realm_id))
    }

    async fn request(&self, realm_id: &str, endpoint: &str, request: ApiRequest) -> Result<Value> {
        let token = self.access_token(realm_id).await?;
        self.oauth
            .make_api_request(endpoint, &token, realm_id, request)
            .await
    }

    /// Run a read query and return the rows stored under `expected_key`
    /// in the `QueryResponse` envelope (empty when the provider omits it).
    pub async fn query<T: DeserializeOwned>(
        &self,
        realm_id: &str,
        query: &str,
        expected_key: &str,
    ) -> Result<Vec<T>> {
        debug!("ledger query for realm {}: {}", realm_id, query);
        let endpoint = format!("/query?query={}", urlencoding::encode(query));
        let response = self.request(realm_id, &endpoint, ApiRequest::get()).await?;
        unwrap_query_response(response, expected_key)
    }

    async fn get_entity<T: DeserializeOwned>(
        &self,
        realm_id: &str,
        endpoint: &str,
        key: &str,
    ) -> Result<T> {
        let response = self.request(realm_id, endpoint, ApiRequest::get()).await?;
        unwrap_entity(response, key)
    }

    async fn post_entity<T: DeserializeOwned>(
        &self,
        realm_id: &str,
        endpoint: &str,
        key: &str,
        body: Value,
    ) -> Result<T> {
        let response = self
            .request(realm_id, endpoint, ApiRequest::post(body))
            .await?;
        unwrap_entity(response, key)
    }

    // ---------- Reads ----------

    pub async fn get_customers(&self, realm_id: &str) -> Result<Vec<Customer>> {
        let query = format!("SELECT * FROM Customer MAXRESULTS {}", MAX_RESULTS);
        self.query(realm_id, &query, "Customer").await
    }

    pub async fn get_customer(&self, realm_id: &str, customer_id: &str) -> Result<Customer> {
        let endpoint = format!("/customer/{}", urlencoding::encode(customer_id));
        self.get_entity(realm_id, &endpoint, "Customer").await
    }

    pub async fn get_invoices(
        &self,
        realm_id: &str,
        customer_id: Option<&str>,
    ) -> Result<Vec<Invoice>> {
        let query = select_for_customer("Invoice", customer_id);
        self.query(realm_id, &query, "Invoice").await
    }

    pub async fn get_invoice(&self, realm_id: &str, invoice_id: &str) -> Result<Invoice> {
        let endpoint = format!("/invoice/{}", urlencoding::encode(invoice_id));
        self.get_entity(realm_id, &endpoint, "Invoice").await
    }

    /// Invoices with an open balance whose due date is before today (UTC).
    pub async fn get_overdue_invoices(&self, realm_id: &str) -> Result<Vec<Invoice>> {
        let query = overdue_invoices_query(Utc::now().date_naive());
        self.query(realm_id, &query, "Invoice").await
    }

    pub async fn get_payments(
        &self,
        realm_id: &str,
        customer_id: Option<&str>,
    ) -> Result<Vec<Payment>> {
        let query = select_for_customer("Payment", customer_id);
        self.query(realm_id, &query, "Payment").await
    }

    pub async fn get_items(&self, realm_id: &str) -> Result<Vec<Item>> {
        let query = format!("SELECT * FROM Item MAXRESULTS {}", MAX_RESULTS);
        self.query(realm_id, &query, "Item").await
    }

    pub async fn get_accounts(&self, realm_id: &str) -> Result<Vec<Account>> {
        let query = format!("SELECT * FROM Account MAXRESULTS {}", MAX_RESULTS);
        self.query(realm_id, &query, "Account").await
    }

    pub async fn get_company_info(&self, realm_id: &str) -> Result<CompanyInfo> {
        let endpoint = format!("/companyinfo/{}", urlencoding::encode(realm_id));
        self.get_entity(realm_id, &endpoint, "CompanyInfo").await
    }

    /// Profit and loss report; the report body is returned as the provider sends it.
    pub async fn get_profit_and_loss(
        &self,
        realm_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Value> {
        let mut request = ApiRequest::get();
        if let Some(start) = start_date {
            request = request.with_query("start_date", start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = end_date {
            request = request.with_query("end_date", end.format("%Y-%m-%d").to_string());
        }
        self.request(realm_id, "/reports/ProfitAndLoss", request)
            .await
    }

    pub async fn get_balance_sheet(
        &self,
        realm_id: &str,
        as_of_date: Option<NaiveDate>,
    ) -> Result<Value> {
        let mut request = ApiRequest::get();
        if let Some(as_of) = as_of_date {
            request = request.with_query("as_of_date", as_of.format("%Y-%m-%d").to_string());
        }
        self.request(realm_id, "/reports/BalanceSheet", request)
            .await
    }

    // ---------- Writes ----------

    pub async fn create_customer(&self, realm_id: &str, customer: &Customer) -> Result<Customer> {
        let body = serde_json::to_value(customer)?;
        self.post_entity(realm_id, "/customer", "Customer", body)
            .await
    }

    /// First half of an update: fetch the customer's current `SyncToken`.
    pub async fn prepare_customer_update(
        &self,
        realm_id: &str,
        customer_id: &str,
    ) -> Result<VersionToken> {
        let current = self.get_customer(realm_id, customer_id).await?;
        current
            .sync_token
            .map(VersionToken::new)
            .ok_or_else(|| Error::Api {
                status: 200,
                body: format!("customer {} has no SyncToken", customer_id),
            })
    }

    /// Second half of an update: submit a sparse patch stamped with `version`.
    /// A stale version surfaces as [`Error::Api`]; callers re-prepare and retry.
    pub async fn commit_customer_update(
        &self,
        realm_id: &str,
        customer_id: &str,
        version: &VersionToken,
        patch: Value,
    ) -> Result<Customer> {
        let body = sparse_update_body(patch, customer_id, version)?;
        self.post_entity(realm_id, "/customer", "Customer", body)
            .await
    }

    /// Re-fetch the current version and apply `patch` in one call.
    pub async fn update_customer(
        &self,
        realm_id: &str,
        customer_id: &str,
        patch: Value,
    ) -> Result<Customer> {
        let version = self.prepare_customer_update(realm_id, customer_id).await?;
        self.commit_customer_update(realm_id, customer_id, &version, patch)
            .await
    }

    pub async fn create_invoice(&self, realm_id: &str, invoice: &Invoice) -> Result<Invoice> {
        let body = serde_json::to_value(invoice)?;
        self.post_entity(realm_id, "/invoice", "Invoice", body).await
    }

    pub async fn create_payment(&self, realm_id: &str, payment: &Payment) -> Result<Payment> {
        let body = serde_json::to_value(payment)?;
        self.post_entity(realm_id, "/payment", "Payment", body).await
    }

    pub async fn create_item(&self, realm_id: &str, item: &Item) -> Result<Item> {
        let body = serde_json::to_value(item)?;
        self.post_entity(realm_id, "/item", "Item", body).await
    }
}

/// Query for invoices with an open balance due before `today`.
/// The date literal has no time component, matching the provider's syntax.
pub fn overdue_invoices_query(today: NaiveDate) -> String {
    format!(
        "SELECT * FROM Invoice WHERE Balance > '0' AND DueDate < '{}' MAXRESULTS {}",
        today.format("%Y-%m-%d"),
        MAX_RESULTS
    )
}

fn select_for_customer(entity: &str, customer_id: Option<&str>) -> String {
    match customer_id {
        Some(id) => format!(
            "SELECT * FROM {} WHERE CustomerRef = {} MAXRESULTS {}",
            entity,
            quote_literal(id),
            MAX_RESULTS
        ),
        None => format!("SELECT * FROM {} MAXRESULTS {}", entity, MAX_RESULTS),
    }
}

/// Single-quote a value for the query language, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub fn unwrap_query_response<T: DeserializeOwned>(
    response: Value,
    expected_key: &str,
) -> Result<Vec<T>> {
    match response
        .get("QueryResponse")
        .and_then(|envelope| envelope.get(expected_key))
    {
        Some(rows) => Ok(serde_json::from_value(rows.clone())?),
        None => Ok(Vec::new()),
    }
}

fn unwrap_entity<T: DeserializeOwned>(mut response: Value, key: &str) -> Result<T> {
    match response.get_mut(key) {
        Some(entity) => Ok(serde_json::from_value(entity.take())?),
        None => Err(Error::Api {
            status: 200,
            body: format!("response is missing the {} object", key),
        }),
    }
}

fn sparse_update_body(patch: Value, id: &str, version: &VersionToken) -> Result<Value> {
    let mut body = match patch {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(Error::Api {
                status: 400,
                body: format!("update patch must be a JSON object, got {}", other),
            })
        }
    };
    body.insert("Id".to_string(), json!(id));
    body.insert("SyncToken".to_string(), json!(version.as_str()));
    body.insert("sparse".to_string(), json!(true));
    Ok(Value::Object(body))
}

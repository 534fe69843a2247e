//! Accounting objects as the ledger provider serializes them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to another ledger object (`{"value": "123", "name": "..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Reference {
    pub fn to(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailAddress {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelephoneNumber {
    pub free_form_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_email_addr: Option<EmailAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_phone: Option<TelephoneNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Line items are passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<Value>,
}

impl Invoice {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.balance.unwrap_or(0.0) > 0.0 && self.due_date.map(|d| d < today).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income_account_ref: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub current_balance: Option<f64>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompanyInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub legal_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub email: Option<EmailAddress>,
    #[serde(default)]
    pub fiscal_year_start_month: Option<String>,
}

/// Current optimistic-concurrency stamp of a ledger object.
///
/// Obtained from [`crate::ledger::LedgerApiClient::prepare_customer_update`];
/// an update submitted with a stale stamp is rejected by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(sync_token: impl Into<String>) -> Self {
        Self(sync_token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoice_reads_provider_field_names() {
        let invoice: Invoice = serde_json::from_value(json!({
            "Id": "130",
            "SyncToken": "2",
            "DocNumber": "1037",
            "CustomerRef": {"value": "58", "name": "Acme"},
            "DueDate": "2024-02-01",
            "TotalAmt": 362.07,
            "Balance": 120.0,
            "Line": [{"Amount": 362.07}]
        }))
        .unwrap();
        assert_eq!(invoice.id.as_deref(), Some("130"));
        assert_eq!(invoice.sync_token.as_deref(), Some("2"));
        assert_eq!(invoice.customer_ref.unwrap().value, "58");
        assert_eq!(invoice.line.len(), 1);
    }

    #[test]
    fn overdue_requires_balance_and_past_due_date() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut invoice = Invoice {
            balance: Some(10.0),
            due_date: NaiveDate::from_ymd_opt(2024, 2, 29),
            ..Default::default()
        };
        assert!(invoice.is_overdue(today));
        invoice.due_date = Some(today);
        assert!(!invoice.is_overdue(today));
        invoice.due_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        invoice.balance = Some(0.0);
        assert!(!invoice.is_overdue(today));
    }

    #[test]
    fn new_customer_omits_unset_fields() {
        let customer = Customer {
            display_name: Some("Jane Doe".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&customer).unwrap(),
            json!({"DisplayName": "Jane Doe"})
        );
    }

    #[test]
    fn item_type_uses_provider_key() {
        let item: Item = serde_json::from_value(json!({"Name": "Lawn care", "Type": "Service"})).unwrap();
        assert_eq!(item.item_type.as_deref(), Some("Service"));
    }
}

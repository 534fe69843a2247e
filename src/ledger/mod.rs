//! QuickBooks ("ledger provider") integration: OAuth credential lifecycle and
//! the typed accounting API built on top of it.

pub mod api;
pub mod models;
pub mod oauth;

pub use api::{overdue_invoices_query, LedgerApiClient};
pub use models::{
    Account, CompanyInfo, Customer, EmailAddress, Invoice, Item, Payment, Reference,
    TelephoneNumber, VersionToken,
};
pub use oauth::{ApiRequest, LedgerOAuthClient};

pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod phone;
pub mod store;
pub mod sync;
pub mod test_utils;
pub mod types;

pub use error::{Error, Result};

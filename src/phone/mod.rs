//! OpenPhone ("phone provider") integration.

pub mod client;
pub mod models;
pub mod sync;

pub use client::{OpenPhoneHttp, PhoneApi};
pub use models::{RemoteCall, RemoteMessage, RemotePhoneNumber};
pub use sync::PhoneSyncClient;

//! Blocking HTTP backend for the two model tiers.

pub mod client;
pub mod keys;
pub mod response;

pub use client::VnptClient;
pub use keys::{ApiKeys, TierCredentials};
pub use response::classify_response;

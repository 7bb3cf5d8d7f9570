//! Firestore REST API client.
//!
//! This crate provides:
//! - Typed repositories for accounts, content profiles, generations and invoices
//! - Optimistic read-modify-write on document `updateTime`
//! - Service account authentication via gcp_auth, or a fixed emulator token
//! - Retry with jittered backoff and request metrics

pub mod accounts;
pub mod client;
pub mod error;
pub mod generations;
pub mod invoices;
pub mod metrics;
pub mod optimistic;
pub mod profiles;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use accounts::AccountRepository;
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use generations::GenerationRepository;
pub use invoices::InvoiceRepository;
pub use profiles::ProfileRepository;
pub use retry::RetryConfig;
pub use token_cache::TokenCache;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};

//! Video generation worker.
//!
//! This crate provides:
//! - The per-user generation session state machine
//! - Entitlement accounting over plan limits and purchased credits
//! - Script, speech and payment provider clients with retries
//! - Payment reconciliation with a periodic sweep
//! - Firestore and in-memory persistence

pub mod composer;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod payment;
pub mod reconciler;
pub mod retry;
pub mod script;
pub mod services;
pub mod session;
pub mod speech;
pub mod store;

pub use composer::VideoComposer;
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use ledger::EntitlementLedger;
pub use logging::SessionLogger;
pub use reconciler::Reconciler;
pub use services::Services;
pub use session::{SessionEngine, Transport, UserEvent};

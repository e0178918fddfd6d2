//! The till payment service.
//!
//! Owns user credit balances and the payment ledger. Serves its own
//! HTTP API for user management and consumes the `payment` work queue
//! for the checkout protocol's `pay` and `cancel` tasks.
//!
//! A payment row is created only when credit was actually debited, and
//! `cancel` refunds that debit and flips the row's `paid` flag in one
//! transaction, so the ledger and the balances never drift apart.

pub(crate) mod api;
pub mod config;
pub(crate) mod handler;
mod metrics;
mod service;
pub mod storage;

pub use config::Config;
pub use service::PaymentService;

/// Name of the durable work queue this service consumes.
pub const WORK_QUEUE: &str = "payment";

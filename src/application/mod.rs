//! Application layer: the payment orchestrator and the components it drives.
//!
//! `PaymentOrchestrator` owns one attempt at a time. Results reach it through
//! the `ResultMultiplexer`, which normalizes and de-duplicates every raw
//! delivery, and stale terminal locks are cleared by the `PendingResolver`.

mod fields;
pub mod idempotency;
pub mod multiplexer;
pub mod normalizer;
pub mod orchestrator;
pub mod resolver;

use super::delivery::Snapshot;
use super::pending::Disposition;
use super::result::RawPayload;
use super::transaction::TransactionRequest;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Capabilities of the external payment terminal bridge.
///
/// `start_transaction` is fire-and-forget: it returns once the terminal has
/// accepted (or refused) the request, never with the final answer. Results
/// come back through the delivery channels.
#[async_trait]
pub trait TerminalBridge: Send + Sync {
    async fn start_transaction(&self, request: &TransactionRequest) -> Result<bool>;
    async fn cancel_transaction(&self) -> Result<bool>;
    async fn has_pending_transaction(&self) -> Result<bool>;
    async fn get_pending_info(&self) -> Result<Option<RawPayload>>;
    /// Confirms or undoes a transaction. `handle` may be empty.
    async fn confirm(&self, handle: &str, disposition: Disposition) -> Result<bool>;

    async fn confirm_last_approved(&self) -> Result<bool> {
        Err(PaymentError::Unsupported("confirm_last_approved"))
    }

    async fn resolve_pending(&self) -> Result<bool> {
        Err(PaymentError::Unsupported("resolve_pending"))
    }
}

/// Read side of the persisted result snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn latest(&self) -> Result<Option<Snapshot>>;
}

/// Write side of the persisted result snapshot, used by bridge adapters.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, snapshot: Snapshot) -> Result<()>;
}

pub type BridgeRef = Arc<dyn TerminalBridge>;
pub type SnapshotSourceRef = Arc<dyn SnapshotSource>;
pub type SnapshotSinkRef = Arc<dyn SnapshotSink>;

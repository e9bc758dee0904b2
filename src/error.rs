use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("A payment session is already in flight for order {order_id}")]
    Busy { order_id: String },
    #[error("Terminal rejected start of order {order_id}: {reason}")]
    BridgeRejectedStart { order_id: String, reason: String },
    #[error("Terminal holds an unconfirmed transaction that could not be resolved")]
    PendingUnresolved { confirmation_id: Option<String> },
    #[error("No result for order {order_id} within {waited:?}; outcome is inconclusive")]
    Timeout { order_id: String, waited: Duration },
    #[error("Declined by terminal (code {code:?}): {message}")]
    Declined {
        code: Option<String>,
        message: String,
    },
    #[error("Bridge error: {0}")]
    Bridge(String),
    #[error("Terminal does not support {0}")]
    Unsupported(&'static str),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Faults raised before any money moved. The caller may retry from `Idle`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::BridgeRejectedStart { .. } | Self::PendingUnresolved { .. }
        )
    }

    /// The terminal may or may not have charged the customer.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

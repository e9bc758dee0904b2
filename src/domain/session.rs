use super::result::{CanonicalResult, DedupKey, ResultStatus};
use super::transaction::TransactionRequest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle of one payment attempt.
///
/// ```text
/// Idle -> Initiating -> AwaitingResult -> ConfirmingPending -> Settled(Approved)
///                   \                 \-> Settled(Declined | Cancelled | Error)
///                    \-> Settled(Error | Cancelled)
/// Settled(_) -> Idle
/// ```
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(tag = "phase", content = "status", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Initiating,
    AwaitingResult,
    ConfirmingPending,
    Settled(ResultStatus),
}

impl SessionPhase {
    /// Phases in which a caller may still cancel.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Initiating | Self::AwaitingResult)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Initiating => f.write_str("initiating"),
            Self::AwaitingResult => f.write_str("awaiting_result"),
            Self::ConfirmingPending => f.write_str("confirming_pending"),
            Self::Settled(status) => write!(f, "settled({status})"),
        }
    }
}

/// State of the attempt currently holding the single-flight guard.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub request: TransactionRequest,
    pub result: Option<CanonicalResult>,
    pub started_at: DateTime<Utc>,
    pub dedup_key: Option<DedupKey>,
}

impl SessionState {
    pub fn new(request: TransactionRequest) -> Self {
        Self {
            phase: SessionPhase::Initiating,
            request,
            result: None,
            started_at: Utc::now(),
            dedup_key: None,
        }
    }
}

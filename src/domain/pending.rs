use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which check revealed an unconfirmed terminal transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPath {
    HasPendingQuery,
    PendingInfoQuery,
    /// The current session's own approval, which still awaits confirmation.
    ApprovedResult,
    /// Both pending queries failed. The terminal is presumed locked.
    Unverified,
}

/// What to tell the terminal about a pending transaction.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Confirm,
    Undo,
}

/// Recovery calls, in the order the resolver tries them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ByConfirmationId,
    ByOrderId,
    ConfirmLastApproved,
    EmptyId,
    ResolvePending,
}

impl ResolutionStrategy {
    pub const ORDER: [ResolutionStrategy; 5] = [
        Self::ByConfirmationId,
        Self::ByOrderId,
        Self::ConfirmLastApproved,
        Self::EmptyId,
        Self::ResolvePending,
    ];
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ByConfirmationId => "confirmation_id",
            Self::ByOrderId => "order_id",
            Self::ConfirmLastApproved => "confirm_last_approved",
            Self::EmptyId => "empty_id",
            Self::ResolvePending => "resolve_pending",
        };
        f.write_str(label)
    }
}

/// A terminal-side transaction that was approved but never confirmed or undone.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PendingLock {
    pub confirmation_id: Option<String>,
    pub order_id: Option<String>,
    pub discovered_via: DetectionPath,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<ResolutionStrategy>,
}

impl PendingLock {
    pub fn discovered(discovered_via: DetectionPath) -> Self {
        Self {
            confirmation_id: None,
            order_id: None,
            discovered_via,
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn mark_resolved(&mut self, strategy: ResolutionStrategy) {
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(strategy);
    }
}

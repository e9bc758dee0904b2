use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw, unclassified payload as reported by the terminal bridge.
pub type RawPayload = serde_json::Value;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Approved,
    Declined,
    Cancelled,
    Error,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Operational notes attached to a settled result.
///
/// These never turn a charge into a failure: the money already moved.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementWarning {
    /// The approval stands but the terminal never acknowledged the
    /// confirmation; it will stay locked until a manual recovery.
    ConfirmationFailed { detail: String },
    /// The caller cancelled, but the terminal approved anyway.
    CancelOverridden,
}

impl fmt::Display for SettlementWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfirmationFailed { detail } => write!(f, "confirmation failed: {detail}"),
            Self::CancelOverridden => f.write_str("approved after cancel request"),
        }
    }
}

/// Stable identity of one logical terminal result.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DedupKey {
    /// Identifies the exact terminal transaction.
    Terminal { nsu: String, authorization_code: String },
    Fallback {
        bucket: i64,
        status: ResultStatus,
        amount_minor_units: Option<u64>,
    },
}

/// The normalized shape of any terminal response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct CanonicalResult {
    pub status: ResultStatus,
    pub nsu: Option<String>,
    pub authorization_code: Option<String>,
    pub card_brand: Option<String>,
    pub response_code: Option<String>,
    pub message: Option<String>,
    /// Handle needed to confirm or undo this specific transaction.
    pub confirmation_id: Option<String>,
    pub amount_minor_units: Option<u64>,
    /// Whether the terminal locks until this result is explicitly confirmed.
    pub requires_confirmation: bool,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<SettlementWarning>,
}

impl CanonicalResult {
    /// An empty result of the given status, stamped now.
    pub fn with_status(status: ResultStatus) -> Self {
        Self {
            status,
            nsu: None,
            authorization_code: None,
            card_brand: None,
            response_code: None,
            message: None,
            confirmation_id: None,
            amount_minor_units: None,
            requires_confirmation: false,
            received_at: Utc::now(),
            warning: None,
        }
    }

    /// Result synthesized when the caller cancels and the terminal stays silent.
    pub fn cancelled_by_caller() -> Self {
        Self {
            message: Some("cancelled by caller".to_string()),
            ..Self::with_status(ResultStatus::Cancelled)
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ResultStatus::Approved
    }

    /// Turns any non-approved outcome into an error so callers can use `?`.
    pub fn ensure_approved(self) -> Result<Self> {
        match self.status {
            ResultStatus::Approved => Ok(self),
            _ => Err(PaymentError::Declined {
                code: self.response_code.clone(),
                message: self
                    .message
                    .clone()
                    .unwrap_or_else(|| self.status.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_approved() {
        let mut approved = CanonicalResult::with_status(ResultStatus::Approved);
        approved.nsu = Some("123".into());
        assert!(approved.ensure_approved().is_ok());

        let mut declined = CanonicalResult::with_status(ResultStatus::Declined);
        declined.response_code = Some("51".into());
        declined.message = Some("insufficient funds".into());
        match declined.ensure_approved() {
            Err(PaymentError::Declined { code, message }) => {
                assert_eq!(code.as_deref(), Some("51"));
                assert_eq!(message, "insufficient funds");
            }
            other => panic!("expected decline, got {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_by_caller_needs_no_confirmation() {
        let result = CanonicalResult::cancelled_by_caller();
        assert_eq!(result.status, ResultStatus::Cancelled);
        assert!(!result.requires_confirmation);
        assert!(result.warning.is_none());
    }
}

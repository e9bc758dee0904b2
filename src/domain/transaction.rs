use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A positive monetary amount expressed in the currency's smallest unit.
///
/// Construction rejects zero, so every `TransactionRequest` carries a
/// chargeable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(minor_units: u64) -> Result<Self> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    /// Converts a major-unit decimal (e.g. `10.50`) into minor units.
    ///
    /// More than two fractional digits cannot be charged on a terminal and
    /// are rejected rather than rounded.
    pub fn from_major(value: Decimal) -> Result<Self> {
        let minor = value * Decimal::ONE_HUNDRED;
        if minor.fract() != Decimal::ZERO {
            return Err(PaymentError::ValidationError(format!(
                "Amount {value} has more than two decimal places"
            )));
        }
        let units = minor.to_i64().ok_or_else(|| {
            PaymentError::ValidationError(format!("Amount {value} is out of range"))
        })?;
        if units <= 0 {
            return Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        Self::new(units as u64)
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = PaymentError;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<i64> for Amount {
    type Error = PaymentError;

    fn try_from(value: i64) -> Result<Self> {
        if value <= 0 {
            return Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        Self::new(value as u64)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Credit,
    Debit,
    #[serde(alias = "pix", alias = "instant_transfer")]
    InstantTransfer,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::InstantTransfer => "pix",
        };
        f.write_str(label)
    }
}

/// Immutable input to one payment attempt.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct TransactionRequest {
    pub order_id: String,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub installments: u8,
}

impl TransactionRequest {
    /// Builds a validated request.
    ///
    /// Installments only matter for credit; any other method is normalized
    /// to a single installment.
    pub fn new(
        order_id: impl Into<String>,
        amount: Amount,
        method: PaymentMethod,
        installments: u8,
    ) -> Result<Self> {
        let order_id = order_id.into();
        if order_id.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Order id must not be empty".to_string(),
            ));
        }
        if installments == 0 {
            return Err(PaymentError::ValidationError(
                "Installments must be at least 1".to_string(),
            ));
        }
        let installments = match method {
            PaymentMethod::Credit => installments,
            PaymentMethod::Debit | PaymentMethod::InstantTransfer => 1,
        };
        Ok(Self {
            order_id,
            amount,
            method,
            installments,
        })
    }

    /// Single-installment request; the common case for debit and PIX.
    pub fn single(order_id: impl Into<String>, amount: Amount, method: PaymentMethod) -> Result<Self> {
        Self::new(order_id, amount, method, 1)
    }
}

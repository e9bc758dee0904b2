use super::fields::{
    AMOUNT_FIELDS, AUTH_FIELDS, BRAND_FIELDS, CANCEL_FLAG_FIELDS, CODE_FIELDS,
    CONFIRMATION_ID_FIELDS, MESSAGE_FIELDS, NSU_FIELDS, REQUIRES_CONFIRMATION_FIELDS,
    STATUS_FIELDS, TIMESTAMP_FIELDS, text,
};
use crate::config::NormalizerRules;
use crate::domain::result::{CanonicalResult, RawPayload, ResultStatus};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Converts heterogeneous bridge payloads into a [`CanonicalResult`].
///
/// Classification order:
/// 1. a recognized status literal is trusted as-is;
/// 2. otherwise the numeric response code decides (`0`, decline range,
///    cancellation sentinel);
/// 3. otherwise approval is inferred only from an NSU or authorization code,
///    cancellation from an explicit flag, and everything else is an error.
///
/// Normalization never fails. A payload that cannot be read is an `Error`.
#[derive(Debug, Clone, Default)]
pub struct ResultNormalizer {
    rules: NormalizerRules,
}

impl ResultNormalizer {
    pub fn new(rules: NormalizerRules) -> Self {
        Self { rules }
    }

    pub fn normalize(&self, payload: &RawPayload) -> CanonicalResult {
        let Some(fields) = payload.as_object() else {
            return CanonicalResult {
                message: Some("unreadable terminal payload".to_string()),
                ..CanonicalResult::with_status(ResultStatus::Error)
            };
        };

        let nsu = text(fields, NSU_FIELDS);
        let authorization_code = text(fields, AUTH_FIELDS);
        let status = self.classify(fields, nsu.is_some() || authorization_code.is_some());
        let requires_confirmation = flag(fields, REQUIRES_CONFIRMATION_FIELDS)
            .unwrap_or(status == ResultStatus::Approved);

        CanonicalResult {
            status,
            nsu,
            authorization_code,
            card_brand: text(fields, BRAND_FIELDS),
            response_code: text(fields, CODE_FIELDS),
            message: text(fields, MESSAGE_FIELDS),
            confirmation_id: text(fields, CONFIRMATION_ID_FIELDS),
            amount_minor_units: amount(fields),
            requires_confirmation,
            received_at: timestamp(fields).unwrap_or_else(Utc::now),
            warning: None,
        }
    }

    fn classify(&self, fields: &Map<String, Value>, approval_shaped: bool) -> ResultStatus {
        if let Some(status) = text(fields, STATUS_FIELDS).and_then(|s| status_literal(&s)) {
            return status;
        }

        if let Some(code) = code(fields) {
            if code == 0 {
                return ResultStatus::Approved;
            }
            if self.rules.decline_codes.contains(&code) {
                return ResultStatus::Declined;
            }
            if code == self.rules.cancel_sentinel {
                return ResultStatus::Cancelled;
            }
        }

        if approval_shaped {
            ResultStatus::Approved
        } else if flag(fields, CANCEL_FLAG_FIELDS) == Some(true) {
            ResultStatus::Cancelled
        } else {
            ResultStatus::Error
        }
    }
}

fn status_literal(raw: &str) -> Option<ResultStatus> {
    match raw.trim().to_lowercase().as_str() {
        "approved" | "aprovado" | "aprovada" | "authorized" | "autorizado" | "autorizada"
        | "success" | "sucesso" => Some(ResultStatus::Approved),
        "declined" | "denied" | "rejected" | "negado" | "negada" | "recusado" | "recusada" => {
            Some(ResultStatus::Declined)
        }
        "cancelled" | "canceled" | "aborted" | "cancelado" | "cancelada" => {
            Some(ResultStatus::Cancelled)
        }
        "error" | "failed" | "failure" | "erro" | "falha" => Some(ResultStatus::Error),
        _ => None,
    }
}

fn code(fields: &Map<String, Value>) -> Option<i64> {
    CODE_FIELDS.iter().find_map(|name| match fields.get(*name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn flag(fields: &Map<String, Value>, names: &[&str]) -> Option<bool> {
    names.iter().find_map(|name| match fields.get(*name)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "sim" => Some(true),
            "false" | "0" | "no" | "nao" | "não" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn amount(fields: &Map<String, Value>) -> Option<u64> {
    AMOUNT_FIELDS.iter().find_map(|name| match fields.get(*name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn timestamp(fields: &Map<String, Value>) -> Option<DateTime<Utc>> {
    TIMESTAMP_FIELDS.iter().find_map(|name| match fields.get(*name)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    })
}

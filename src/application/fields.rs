//! Field aliases used by the various terminal firmwares, shared by every
//! component that reads raw payloads.

use serde_json::{Map, Value};

pub(crate) const STATUS_FIELDS: &[&str] = &[
    "status",
    "transactionStatus",
    "transaction_status",
    "situacao",
];
pub(crate) const CODE_FIELDS: &[&str] = &[
    "responseCode",
    "response_code",
    "resultCode",
    "codigoResposta",
    "code",
];
// Business name first, then the names older firmware still reports.
pub(crate) const NSU_FIELDS: &[&str] = &["nsu", "terminalNsu", "hostNsu", "nsuHost", "NSU"];
pub(crate) const AUTH_FIELDS: &[&str] = &[
    "authorizationCode",
    "authorization_code",
    "authCode",
    "codigoAutorizacao",
];
pub(crate) const BRAND_FIELDS: &[&str] = &["cardBrand", "card_brand", "brand", "bandeira"];
pub(crate) const MESSAGE_FIELDS: &[&str] = &[
    "message",
    "resultMessage",
    "displayMessage",
    "mensagem",
];
pub(crate) const CONFIRMATION_ID_FIELDS: &[&str] = &[
    "confirmationId",
    "confirmation_id",
    "confirmationTransactionId",
    "transactionId",
];
pub(crate) const ORDER_ID_FIELDS: &[&str] = &["orderId", "order_id", "referenceId"];
pub(crate) const AMOUNT_FIELDS: &[&str] = &[
    "amountMinorUnits",
    "amount_minor_units",
    "amount",
    "valor",
];
pub(crate) const REQUIRES_CONFIRMATION_FIELDS: &[&str] = &[
    "requiresConfirmation",
    "requires_confirmation",
    "pendingConfirmation",
];
pub(crate) const CANCEL_FLAG_FIELDS: &[&str] = &[
    "cancelled",
    "canceled",
    "userCancelled",
    "cancelado",
];
pub(crate) const TIMESTAMP_FIELDS: &[&str] = &["receivedAt", "received_at", "timestamp"];

/// First non-empty textual value among `names`. Numbers are rendered as text.
pub(crate) fn text(fields: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match fields.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

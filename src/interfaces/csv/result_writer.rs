use crate::domain::result::CanonicalResult;
use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    order_id: &'a str,
    status: String,
    nsu: Option<&'a str>,
    authorization_code: Option<&'a str>,
    card_brand: Option<&'a str>,
    response_code: Option<&'a str>,
    warning: Option<String>,
}

/// Writes settled payment results as CSV.
///
/// Failed attempts are written as `error` rows carrying the error text in
/// the `warning` column, so the output has one row per input request.
pub struct ResultWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_result(&mut self, order_id: &str, result: &CanonicalResult) -> Result<()> {
        self.writer.serialize(ResultRow {
            order_id,
            status: result.status.to_string(),
            nsu: result.nsu.as_deref(),
            authorization_code: result.authorization_code.as_deref(),
            card_brand: result.card_brand.as_deref(),
            response_code: result.response_code.as_deref(),
            warning: result.warning.as_ref().map(ToString::to_string),
        })?;
        Ok(())
    }

    pub fn write_failure(&mut self, order_id: &str, error: &PaymentError) -> Result<()> {
        self.writer.serialize(ResultRow {
            order_id,
            status: "error".to_string(),
            nsu: None,
            authorization_code: None,
            card_brand: None,
            response_code: None,
            warning: Some(error.to_string()),
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

use crate::domain::transaction::{Amount, PaymentMethod, TransactionRequest};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of the input file. `amount` is in major units (e.g. `10.50`).
#[derive(Debug, Deserialize)]
struct RequestRecord {
    order_id: String,
    amount: Decimal,
    method: PaymentMethod,
    installments: Option<u8>,
}

impl TryFrom<RequestRecord> for TransactionRequest {
    type Error = PaymentError;

    fn try_from(record: RequestRecord) -> Result<Self> {
        let amount = Amount::from_major(record.amount)?;
        TransactionRequest::new(
            record.order_id,
            amount,
            record.method,
            record.installments.unwrap_or(1),
        )
    }
}

/// Reads payment requests from a CSV source.
///
/// Wraps `csv::Reader` and yields one `Result<TransactionRequest>` per row,
/// so a malformed row is reported without stopping the batch.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads, deserializes and validates requests.
    pub fn requests(self) -> impl Iterator<Item = Result<TransactionRequest>> {
        self.reader.into_deserialize().map(|row| {
            let record: RequestRecord = row.map_err(PaymentError::from)?;
            TransactionRequest::try_from(record)
        })
    }
}

//! Asynchronous CSV reader with batch interface
//!
//! Provides batches of replay commands from a CSV stream for the async
//! strategy.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of ReplayRecords
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::{LedgerError, ReplayRecord};

/// Asynchronous CSV reader
///
/// Rows that fail to parse are logged, counted and left out of the batches.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    /// Line of the last row read; the header is line 1
    line_num: u64,
    skipped: usize,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a new AsyncReader from an async reader
    ///
    /// # Arguments
    ///
    /// * `reader` - Async reader providing CSV data
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            line_num: 1,
            skipped: 0,
        }
    }

    /// Read a batch of commands
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Maximum number of commands to return
    ///
    /// # Returns
    ///
    /// Up to `batch_size` converted commands. Bad rows are skipped without
    /// counting towards the batch size, so an empty vector means the end of
    /// the input was reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<ReplayRecord> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            let Some(next) = records.next().await else {
                break;
            };
            self.line_num += 1;

            let converted = match next {
                Ok(csv_record) => convert_csv_record(csv_record, self.line_num),
                Err(e) => Err(LedgerError::parse_error(self.line_num, e)),
            };
            match converted {
                Ok(record) => batch.push(record),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping row: {}", e);
                }
            }
        }

        batch
    }

    /// Number of rows skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LedgerCommand, WalletId};
    use futures::io::Cursor;

    const HEADER: &str = "type,reference,wallet,target,amount,currency,converted,rate,note\n";

    fn reader(rows: &str) -> AsyncReader<Cursor<Vec<u8>>> {
        AsyncReader::new(Cursor::new(format!("{}{}", HEADER, rows).into_bytes()))
    }

    fn opened_wallet(record: &ReplayRecord) -> &WalletId {
        match &record.command {
            LedgerCommand::OpenWallet { wallet_id, .. } => wallet_id,
            other => panic!("expected an open, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_batch() {
        let mut async_reader = reader(
            "open,,w-1,alice,,USD,,,\n\
             open,,w-2,bob,,USD,,,\n\
             open,,w-3,carol,,EUR,,,\n",
        );

        let batch = async_reader.read_batch(2).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(opened_wallet(&batch[0]), &WalletId::new("w-1"));
        assert_eq!(batch[1].line, 3);

        let batch = async_reader.read_batch(2).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(opened_wallet(&batch[0]), &WalletId::new("w-3"));
        assert_eq!(batch[0].line, 4);

        assert!(async_reader.read_batch(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_csv() {
        let mut async_reader = reader("");

        assert!(async_reader.read_batch(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped_and_counted() {
        let mut async_reader = reader(
            "chargeback,x,w-1,,,,,,\n\
             deposit,d-1,w-1,,1.5,USD,,,\n\
             deposit,d-2,w-1,,1.5,,,,\n",
        );

        let batch = async_reader.read_batch(10).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].line, 3);
        assert_eq!(async_reader.skipped(), 2);
    }

    #[tokio::test]
    async fn test_batch_of_only_bad_rows_is_not_end_of_input() {
        let mut async_reader = reader(
            "bogus,,,,,,,,\n\
             bogus,,,,,,,,\n\
             open,,w-1,alice,,USD,,,\n",
        );

        let batch = async_reader.read_batch(2).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].line, 4);
        assert_eq!(async_reader.skipped(), 2);
    }

    #[tokio::test]
    async fn test_whitespace_and_case() {
        let mut async_reader = reader("  OPEN , , w-1 , alice , , usd ,,,\n");

        let batch = async_reader.read_batch(10).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(opened_wallet(&batch[0]), &WalletId::new("w-1"));
    }
}

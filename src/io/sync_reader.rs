//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over replay commands from a CSV file.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Iterator Interface
//!
//! SyncReader implements the Iterator trait, yielding
//! `Result<ReplayRecord, LedgerError>` for each CSV row:
//!
//! ```no_run
//! use wallet_ledger::io::sync_reader::SyncReader;
//! use std::path::Path;
//!
//! let reader = SyncReader::open(Path::new("commands.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(record) => println!("line {}: {:?}", record.line, record.command),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `open()`
//! - Individual row errors are yielded as `ParseError`s carrying the line
//!   number, and iteration continues with the next row
//!
//! Rows are read one at a time, so memory use does not grow with the file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::{LedgerError, ReplayRecord};

/// Synchronous CSV reader
#[derive(Debug)]
pub struct SyncReader<R: Read = File> {
    reader: csv::Reader<R>,
    /// Line of the last row read; the header is line 1
    line_num: u64,
}

impl SyncReader<File> {
    /// Open a CSV file for streaming iteration
    ///
    /// # Returns
    ///
    /// * `Ok(SyncReader)` if the file opened successfully
    /// * `Err(LedgerError::FileNotFound)` if it does not exist
    /// * `Err(LedgerError::IoError)` for any other open failure
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LedgerError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => LedgerError::from(e),
        })?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> SyncReader<R> {
    /// Wrap any reader
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow rows with fewer columns than the header
    /// - Use an 8KB buffer
    pub fn from_reader(reader: R) -> Self {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(reader);

        Self {
            reader,
            line_num: 1,
        }
    }
}

impl<R: Read> Iterator for SyncReader<R> {
    type Item = Result<ReplayRecord, LedgerError>;

    /// Get the next command from the CSV input
    ///
    /// # Returns
    ///
    /// * `Some(Ok(ReplayRecord))` - Successfully parsed command
    /// * `Some(Err(LedgerError::ParseError))` - Parse or conversion error
    /// * `None` - End of input reached
    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CsvRecord>();
        let next = deserializer.next()?;
        self.line_num += 1;

        Some(match next {
            Ok(csv_record) => convert_csv_record(csv_record, self.line_num),
            Err(e) => Err(LedgerError::parse_error(self.line_num, e)),
        })
    }
}

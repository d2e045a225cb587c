//! Record sources.
//!
//! A source hands the pipeline an ordered batch of `RawRecord`s per cycle:
//!
//! - `file`: CSV export with a header row (pull)
//! - `sheet`: spreadsheet values endpoint over HTTP (pull)
//! - `events`: JSON-lines file, one flattened record per inbound event (push)
//!
//! Any failure to fetch is a `SourceFetch` error: fatal for the current cycle,
//! retried on the next one.

pub mod events;
pub mod file;
pub mod sheet;

pub use events::EventLogSource;
pub use file::CsvFileSource;
pub use sheet::SheetSource;

use crate::domain::RawRecord;
use crate::error::AppError;

pub trait RecordSource {
    /// Fetch the current batch, in source order.
    fn fetch(&self) -> Result<Vec<RawRecord>, AppError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Turn a header row plus value rows into records numbered from 1.
pub fn records_from_rows(
    header: Vec<String>,
    rows: impl IntoIterator<Item = Vec<String>>,
) -> Vec<RawRecord> {
    rows.into_iter()
        .filter(|row| row.iter().any(|v| !v.trim().is_empty()))
        .enumerate()
        .map(|(idx, row)| RawRecord::from_row(&header, row, idx + 1))
        .collect()
}

//! CSV export source.

use std::fs::File;
use std::path::PathBuf;

use super::{RecordSource, records_from_rows};
use crate::domain::RawRecord;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for CsvFileSource {
    fn fetch(&self) -> Result<Vec<RawRecord>, AppError> {
        let file = File::open(&self.path).map_err(|e| {
            AppError::fetch(format!("Failed to open CSV '{}': {e}", self.path.display()))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(file);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::fetch(format!("Failed to read CSV headers: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows: Vec<Vec<String>> = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| AppError::fetch(format!("CSV parse error: {e}")))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(records_from_rows(header, rows))
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

//! Spreadsheet values endpoint.
//!
//! Expects the common "values" response shape: the first row is the header,
//! every following row is one record.
//!
//! ```json
//! { "range": "Sheet1!A1:F200", "values": [["Date", "Name"], ["5/1/26", "J Smith"]] }
//! ```

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use super::{RecordSource, records_from_rows};
use crate::domain::RawRecord;
use crate::error::AppError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SheetSource {
    client: Client,
    url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl SheetSource {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AppError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    /// Build from `JOBDOCS_SHEET_URL` / `JOBDOCS_SHEET_TOKEN` (a `.env` file is honored).
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let url = std::env::var("JOBDOCS_SHEET_URL")
            .map_err(|_| AppError::config("Missing JOBDOCS_SHEET_URL in environment (.env)."))?;
        let token = std::env::var("JOBDOCS_SHEET_TOKEN").ok();
        Self::new(url, token)
    }
}

impl RecordSource for SheetSource {
    fn fetch(&self) -> Result<Vec<RawRecord>, AppError> {
        let mut req = self.client.get(&self.url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .map_err(|e| AppError::fetch(format!("Sheet request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::fetch(format!(
                "Sheet request failed with status {}.",
                resp.status()
            )));
        }

        let body: ValuesResponse = resp
            .json()
            .map_err(|e| AppError::fetch(format!("Failed to parse sheet response: {e}")))?;

        let records = parse_values(body.values);
        debug!(rows = records.len(), "sheet rows fetched");
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("sheet:{}", self.url)
    }
}

fn parse_values(values: Vec<Vec<serde_json::Value>>) -> Vec<RawRecord> {
    let mut rows = values.into_iter().map(|row| row.into_iter().map(cell_text).collect::<Vec<_>>());
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    records_from_rows(header, rows)
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

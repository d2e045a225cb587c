//! Audit trail for generated artifacts.
//!
//! Every newly generated artifact appends one fixed-shape row. Sinks are
//! fire-and-forget: a failed append is logged and the pipeline moves on.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{CanonicalRecord, ResolvedDate};
use crate::error::AppError;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub name: String,
    pub contact: String,
    /// Resolved ISO date, or the raw text when unresolved.
    pub date: String,
    pub notes: String,
    pub timestamp: String,
}

impl AuditRow {
    pub fn new(
        record: &CanonicalRecord,
        resolved: Option<&ResolvedDate>,
        at: DateTime<Utc>,
    ) -> Self {
        let date = match resolved {
            Some(r) => r.date.format("%Y-%m-%d").to_string(),
            None => record.date_raw.clone(),
        };
        Self {
            name: record.name.clone(),
            contact: record.contact.clone(),
            date,
            notes: record.notes.clone(),
            timestamp: at.to_rfc3339(),
        }
    }
}

pub trait AuditSink {
    /// Append one row. Must not fail the caller.
    fn append(&self, row: &AuditRow);
}

/// Discards everything. Used when no audit target is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _row: &AuditRow) {}
}

/// Appends rows to a local CSV file, writing the header on first use.
#[derive(Debug, Clone)]
pub struct CsvAuditSink {
    path: PathBuf,
}

impl CsvAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn try_append(&self, row: &AuditRow) -> Result<(), csv::Error> {
        let is_new = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}

impl AuditSink for CsvAuditSink {
    fn append(&self, row: &AuditRow) {
        match self.try_append(row) {
            Ok(()) => debug!(path = %self.path.display(), "audit row appended"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "audit append failed"),
        }
    }
}

/// POSTs each row as JSON to an HTTP endpoint.
pub struct WebhookAuditSink {
    client: Client,
    url: String,
}

impl WebhookAuditSink {
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| AppError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl AuditSink for WebhookAuditSink {
    fn append(&self, row: &AuditRow) {
        let result = self
            .client
            .post(&self.url)
            .json(row)
            .send()
            .and_then(|resp| resp.error_for_status());
        if let Err(err) = result {
            warn!(url = %self.url, error = %err, "audit webhook failed");
        }
    }
}

/// Fan-out to several sinks.
#[derive(Default)]
pub struct AuditSinks {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl AuditSinks {
    pub fn push(&mut self, sink: Box<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for AuditSinks {
    fn append(&self, row: &AuditRow) {
        for sink in &self.sinks {
            sink.append(row);
        }
    }
}

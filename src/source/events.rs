//! Push-style source: a JSON-lines log of inbound form events.
//!
//! Whatever receives the webhook appends one JSON object per line. Each line
//! becomes one record; nested objects are flattened to dotted keys and arrays
//! are joined with ", ".

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::warn;

use super::RecordSource;
use crate::domain::RawRecord;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct EventLogSource {
    path: PathBuf,
}

impl EventLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for EventLogSource {
    fn fetch(&self) -> Result<Vec<RawRecord>, AppError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            // Nothing has been pushed yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::fetch(format!(
                    "Failed to open event log '{}': {err}",
                    self.path.display()
                )));
            }
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| AppError::fetch(format!("Failed to read event log: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => records.push(flatten_event(&map, records.len() + 1)),
                Ok(_) => warn!(line = idx + 1, "event is not a JSON object; ignored"),
                Err(err) => warn!(line = idx + 1, error = %err, "malformed event; ignored"),
            }
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("events:{}", self.path.display())
    }
}

/// Flatten one event object into a record.
pub fn flatten_event(event: &Map<String, Value>, row_number: usize) -> RawRecord {
    let mut pairs = Vec::new();
    flatten_into("", event, &mut pairs);
    RawRecord::from_pairs(pairs, row_number)
}

fn flatten_into(prefix: &str, map: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(&name, inner, out),
            other => out.push((name, scalar_text(other))),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(scalar_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

//! Shared domain types.
//!
//! Records flow through the pipeline in three shapes:
//!
//! - `RawRecord`: exactly what the source delivered (header names + ordered values)
//! - `CanonicalRecord`: the normalized fields the core cares about
//! - `ResolvedDate`: the single calendar date chosen for a record (if any)

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Date token used in filenames when a record has no resolvable date.
///
/// It deliberately satisfies the `D-M-YYYY` shape so integrity checks still pass.
pub const SENTINEL_DATE_TOKEN: &str = "0-0-0000";

/// One row or event exactly as delivered by a record source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    headers: Vec<String>,
    values: Vec<String>,
    /// 1-based position of the record in the fetched sequence (header excluded).
    pub row_number: usize,
}

impl RawRecord {
    /// Build a record from a header row and a value row.
    ///
    /// Short rows are padded with empty strings; surplus values are kept so
    /// positional overrides can still reach them.
    pub fn from_row(headers: &[String], values: Vec<String>, row_number: usize) -> Self {
        let mut headers = headers.to_vec();
        while headers.len() < values.len() {
            headers.push(String::new());
        }
        let mut values = values;
        values.resize(headers.len(), String::new());
        Self {
            headers,
            values,
            row_number,
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>, row_number: usize) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (headers, values): (Vec<String>, Vec<String>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            headers,
            values,
            row_number,
        }
    }

    /// Ordered value sequence, indexable by zero-based column.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Exact (case-sensitive) lookup by header name; first match wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| self.value_at(idx))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Fields the core pipeline understands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalField {
    Id,
    Date,
    Name,
    Contact,
    Job,
    Notes,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 6] = [
        CanonicalField::Id,
        CanonicalField::Date,
        CanonicalField::Name,
        CanonicalField::Contact,
        CanonicalField::Job,
        CanonicalField::Notes,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CanonicalField::Id => "id",
            CanonicalField::Date => "date",
            CanonicalField::Name => "name",
            CanonicalField::Contact => "contact",
            CanonicalField::Job => "job",
            CanonicalField::Notes => "notes",
        }
    }
}

impl std::str::FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalField::ALL
            .into_iter()
            .find(|f| f.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown field '{s}' (expected one of: id, date, name, contact, job, notes)")
            })
    }
}

/// A record mapped onto canonical fields. Unmapped fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub row_number: usize,
    /// Identifier used for watermark ordering (falls back to the row number).
    pub id: String,
    pub date_raw: String,
    pub name: String,
    pub contact: String,
    pub job: String,
    pub notes: String,
    /// Every source field, keyed by its normalized header name.
    pub extra: BTreeMap<String, String>,
}

impl CanonicalRecord {
    pub fn field(&self, field: CanonicalField) -> &str {
        match field {
            CanonicalField::Id => &self.id,
            CanonicalField::Date => &self.date_raw,
            CanonicalField::Name => &self.name,
            CanonicalField::Contact => &self.contact,
            CanonicalField::Job => &self.job,
            CanonicalField::Notes => &self.notes,
        }
    }
}

/// How a date string was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpretation {
    DayMonthYear,
    MonthDayYear,
    Iso,
    Textual,
    /// Lenient parse used only by the heuristic policy.
    FreeForm,
}

impl Interpretation {
    pub fn label(self) -> &'static str {
        match self {
            Interpretation::DayMonthYear => "day-month-year",
            Interpretation::MonthDayYear => "month-day-year",
            Interpretation::Iso => "iso",
            Interpretation::Textual => "textual",
            Interpretation::FreeForm => "free-form",
        }
    }
}

/// One valid reading of a raw date string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateCandidate {
    pub kind: Interpretation,
    pub date: NaiveDate,
    /// The part of the input that produced this reading.
    pub source: String,
}

/// The single date chosen for a raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedDate {
    pub date: NaiveDate,
    pub kind: Interpretation,
}

impl ResolvedDate {
    /// Unpadded day-month-year token used in artifact filenames.
    pub fn token(&self) -> String {
        format!("{}-{}-{}", self.date.day(), self.date.month(), self.date.year())
    }
}

/// Date resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatePolicy {
    /// Numeric dates are always day-month-year. Canonical.
    #[default]
    Deterministic,
    /// Legacy multi-candidate selection. Kept for compatibility.
    Heuristic,
}

/// How the artifact writer treats an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    SkipIfExists,
    ForceOverwrite,
    DryRun,
}

/// What the writer actually did for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteOutcome {
    Created,
    Overwritten,
    Skipped,
    /// Dry-run: nothing touched. `would_skip` reports what skip-if-exists would do.
    DryRun { would_skip: bool },
}

impl WriteOutcome {
    pub fn skipped(self) -> bool {
        matches!(self, WriteOutcome::Skipped)
    }
}

/// Target of a single artifact write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub exists: bool,
    pub mode: WriteMode,
}

/// Total order applied to record identifiers by the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdOrder {
    /// Compare as integers when both sides parse; otherwise fall back to lexical.
    #[default]
    Numeric,
    Lexical,
}

/// A full cycle's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    /// Artifact file extension (without the dot).
    pub extension: String,

    pub policy: DatePolicy,
    /// Let the retention cutoff break DMY/MDY ties (heuristic policy only).
    pub heuristic_cutoff_tiebreak: bool,

    /// Trailing retention window in days; `<= 0` disables filtering.
    pub window_days: i64,
    /// Keep only the most recent N records after filtering.
    pub last_n: Option<usize>,
    /// Prune artifacts down to this many after generation.
    pub prune_keep: Option<usize>,

    pub mode: WriteMode,
    pub id_order: IdOrder,
    pub use_watermark: bool,

    /// Lock markers older than this are reclaimed. `None` disables reclaiming.
    pub stale_lock_after: Option<Duration>,
}

/// End-of-run counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub already_processed: usize,
    pub unresolved_dates: usize,
    pub outside_window: usize,
    pub capped: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned: usize,
    pub dry_run: bool,
    /// Watermark after the cycle (if any).
    pub watermark: Option<String>,
    /// Raw date strings that could not be resolved, for diagnostics.
    pub unresolved_samples: Vec<String>,
}

//! Field normalization.
//!
//! Form builders and spreadsheets rarely agree on header spelling ("Job Number",
//! "job no.", "JOB #"). Headers are matched after lowercasing and dropping
//! everything except letters and digits, against a list of accepted spellings
//! per canonical field.
//!
//! Some sources reuse a header for two different columns. For those fields a
//! named positional override (zero-based column index) wins over name lookup.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::domain::{CanonicalField, CanonicalRecord, RawRecord};
use crate::error::AppError;

/// On-disk shape of `--field-map`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldMapFile {
    /// Extra accepted spellings, tried before the built-in ones.
    #[serde(default)]
    aliases: BTreeMap<CanonicalField, Vec<String>>,
    /// Zero-based column index per field.
    #[serde(default)]
    positions: BTreeMap<CanonicalField, usize>,
}

/// Header spellings and positional overrides for every canonical field.
#[derive(Debug, Clone)]
pub struct FieldMap {
    aliases: BTreeMap<CanonicalField, Vec<String>>,
    positions: BTreeMap<CanonicalField, usize>,
}

impl Default for FieldMap {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        for field in CanonicalField::ALL {
            let spellings: &[&str] = match field {
                CanonicalField::Id => &["id", "submission id", "response id", "entry id", "row id"],
                CanonicalField::Date => &[
                    "date", "job date", "date of job", "work date", "date of work", "visit date",
                ],
                CanonicalField::Name => &[
                    "name", "full name", "customer name", "client name", "customer",
                ],
                CanonicalField::Contact => &[
                    "contact", "email", "email address", "phone", "phone number", "contact number",
                ],
                CanonicalField::Job => &[
                    "job number", "job no", "job #", "job id", "job ref", "job reference", "job",
                ],
                CanonicalField::Notes => &[
                    "notes", "description", "comments", "details", "work carried out",
                ],
            };
            aliases.insert(field, spellings.iter().map(|s| s.to_string()).collect());
        }
        Self {
            aliases,
            positions: BTreeMap::new(),
        }
    }
}

impl FieldMap {
    /// Load a JSON field map and layer it over the built-in spellings.
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| {
            AppError::config(format!("Failed to open field map '{}': {e}", path.display()))
        })?;
        let parsed: FieldMapFile = serde_json::from_reader(file)
            .map_err(|e| AppError::config(format!("Invalid field map '{}': {e}", path.display())))?;

        let mut map = Self::default();
        for (field, mut extra) in parsed.aliases {
            let builtin = map.aliases.remove(&field).unwrap_or_default();
            extra.extend(builtin);
            map.aliases.insert(field, extra);
        }
        map.positions = parsed.positions;
        Ok(map)
    }

    /// Read `field` from column `index` regardless of header names.
    pub fn with_position(mut self, field: CanonicalField, index: usize) -> Self {
        self.positions.insert(field, index);
        self
    }

    pub fn position(&self, field: CanonicalField) -> Option<usize> {
        self.positions.get(&field).copied()
    }

    /// Map a raw record onto canonical fields. Unmapped fields are empty.
    pub fn normalize(&self, raw: &RawRecord) -> CanonicalRecord {
        let mut by_key: HashMap<String, usize> = HashMap::new();
        let mut extra = BTreeMap::new();
        for (idx, (header, value)) in raw.fields().enumerate() {
            by_key.entry(match_key(header)).or_insert(idx);
            let key = match template_key(header) {
                k if k.is_empty() => format!("column_{idx}"),
                k => k,
            };
            extra.entry(key).or_insert_with(|| value.trim().to_string());
        }

        let lookup = |field: CanonicalField| -> String {
            if let Some(index) = self.position(field) {
                if let Some(value) = raw.value_at(index) {
                    return value.trim().to_string();
                }
                debug!(
                    field = field.key(),
                    index,
                    row = raw.row_number,
                    "positional override out of range"
                );
            }
            self.aliases
                .get(&field)
                .into_iter()
                .flatten()
                .find_map(|alias| by_key.get(&match_key(alias)))
                .and_then(|idx| raw.value_at(*idx))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let id = match lookup(CanonicalField::Id) {
            id if id.is_empty() => raw.row_number.to_string(),
            id => id,
        };

        CanonicalRecord {
            row_number: raw.row_number,
            id,
            date_raw: lookup(CanonicalField::Date),
            name: lookup(CanonicalField::Name),
            contact: lookup(CanonicalField::Contact),
            job: lookup(CanonicalField::Job),
            notes: lookup(CanonicalField::Notes),
            extra,
        }
    }
}

/// Case- and punctuation-insensitive header key: `"Job No."` -> `"jobno"`.
pub fn match_key(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Template-friendly header key: `"Job Number"` -> `"job_number"`.
pub fn template_key(header: &str) -> String {
    let lowered: String = header
        .trim_start_matches('\u{feff}')
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join("_")
}

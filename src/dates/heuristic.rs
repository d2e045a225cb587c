//! Legacy heuristic date policy.
//!
//! Builds up to three candidates (lenient free-form parse, numeric DMY, numeric
//! MDY) and picks DMY when valid, else free-form, else whatever came first.
//!
//! When DMY and MDY are both valid and disagree, an optional cutoff can break the
//! tie: if only the MDY reading falls inside the window, MDY wins. This makes
//! the result depend on when the run happens, so callers must opt in
//! explicitly with [`HeuristicResolver::with_cutoff`].

use chrono::{NaiveDate, NaiveDateTime};

use super::deterministic::{collapse_whitespace, numeric_parts, validated};
use crate::domain::{DateCandidate, Interpretation, ResolvedDate};

/// Free-form formats tried in order. Numeric forms here are month-first.
/// Two-digit year forms come first; `%Y` would otherwise read `26` as year 26.
const FREE_FORM_FORMATS: [&str; 12] = [
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%y",
    "%m-%d-%Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicResolver {
    cutoff: Option<NaiveDateTime>,
}

impl HeuristicResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult `cutoff` when DMY and MDY readings are both valid.
    pub fn with_cutoff(mut self, cutoff: Option<NaiveDateTime>) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn candidates(&self, raw: &str) -> Vec<DateCandidate> {
        let input = collapse_whitespace(raw);
        let mut out = Vec::new();
        if input.is_empty() {
            return out;
        }

        if let Some(date) = free_form(&input) {
            out.push(DateCandidate {
                kind: Interpretation::FreeForm,
                date,
                source: input.clone(),
            });
        }

        if let Some((first, second, year)) = numeric_parts(&input) {
            if let Some(date) = validated(year, second, first) {
                out.push(DateCandidate {
                    kind: Interpretation::DayMonthYear,
                    date,
                    source: input.clone(),
                });
            }
            if let Some(date) = validated(year, first, second) {
                out.push(DateCandidate {
                    kind: Interpretation::MonthDayYear,
                    date,
                    source: input.clone(),
                });
            }
        }

        out
    }

    pub fn resolve(&self, raw: &str) -> Option<ResolvedDate> {
        let candidates = self.candidates(raw);
        let find = |kind: Interpretation| candidates.iter().find(|c| c.kind == kind);

        let dmy = find(Interpretation::DayMonthYear);
        let mdy = find(Interpretation::MonthDayYear);

        let chosen = match (dmy, mdy, self.cutoff) {
            (Some(d), Some(m), Some(cutoff)) if d.date != m.date => {
                if !within(d.date, cutoff) && within(m.date, cutoff) {
                    m
                } else {
                    d
                }
            }
            (Some(d), _, _) => d,
            _ => find(Interpretation::FreeForm).or_else(|| candidates.first())?,
        };

        Some(ResolvedDate {
            date: chosen.date,
            kind: chosen.kind,
        })
    }
}

fn within(date: NaiveDate, cutoff: NaiveDateTime) -> bool {
    date.and_hms_opt(0, 0, 0).is_some_and(|start| start >= cutoff)
}

fn free_form(input: &str) -> Option<NaiveDate> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(input) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(input) {
        return Some(dt.date_naive());
    }

    let stripped = strip_ordinals(input);
    FREE_FORM_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&stripped, fmt).ok())
}

/// `5th` -> `5`, leaving words like `August` alone.
fn strip_ordinals(input: &str) -> String {
    input
        .split(' ')
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let trimmed = lower.trim_end_matches(',');
            for suffix in ["st", "nd", "rd", "th"] {
                if let Some(num) = trimmed.strip_suffix(suffix) {
                    if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) {
                        let comma = if word.ends_with(',') { "," } else { "" };
                        return format!("{num}{comma}");
                    }
                }
            }
            word.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

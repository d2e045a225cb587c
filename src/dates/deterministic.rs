//! Deterministic date policy.
//!
//! Numeric dates are always read day-month-year. There is no data-dependent
//! disambiguation and no lenient fallback: a string that matches none of the
//! shapes below resolves to nothing.
//!
//! Shapes, in priority order:
//!
//! 1. ISO `YYYY-MM-DD` (an optional time suffix is ignored)
//! 2. numeric `D/M/Y` with one of `/ - . space` as separator; `YY` means `20YY`
//! 3. textual month: `5th January 2026`, `January 5 2026`, `Mon 5 Jan, 2026`

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::domain::{DateCandidate, Interpretation, ResolvedDate};

static ISO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((\d{4})-(\d{1,2})-(\d{1,2}))(?:[T ]\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("ISO date pattern is valid")
});

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})([/\-. ])(\d{1,2})([/\-. ])(\d{2}|\d{4})$")
        .expect("numeric date pattern is valid")
});

static TEXTUAL_DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z]+,?\s+)??(\d{1,2})(?:st|nd|rd|th)?(?:\s+of)?\s+([a-z]+)\.?,?\s+(\d{4})$")
        .expect("textual day-first pattern is valid")
});

static TEXTUAL_MONTH_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z]+,?\s+)??([a-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})$")
        .expect("textual month-first pattern is valid")
});

/// Resolve `raw` under the deterministic policy.
pub fn resolve(raw: &str) -> Option<ResolvedDate> {
    candidates(raw).into_iter().next().map(|c| ResolvedDate {
        date: c.date,
        kind: c.kind,
    })
}

/// Every valid reading of `raw`, highest priority first.
pub fn candidates(raw: &str) -> Vec<DateCandidate> {
    let input = collapse_whitespace(raw);
    let mut out = Vec::new();
    if input.is_empty() {
        return out;
    }

    out.extend(iso(&input));
    out.extend(day_month_year(&input));
    out.extend(textual(&input));
    out
}

fn iso(input: &str) -> Option<DateCandidate> {
    let caps = ISO.captures(input)?;
    let year = caps[2].parse().ok()?;
    let month = caps[3].parse().ok()?;
    let day = caps[4].parse().ok()?;
    Some(DateCandidate {
        kind: Interpretation::Iso,
        date: validated(year, month, day)?,
        source: caps[1].to_string(),
    })
}

fn day_month_year(input: &str) -> Option<DateCandidate> {
    let (first, second, year) = numeric_parts(input)?;
    Some(DateCandidate {
        kind: Interpretation::DayMonthYear,
        date: validated(year, second, first)?,
        source: input.to_string(),
    })
}

/// Split a numeric date into `(first, second, year)` without assigning day/month.
///
/// Both separators must be the same character.
pub(crate) fn numeric_parts(input: &str) -> Option<(u32, u32, i32)> {
    let caps = NUMERIC.captures(input)?;
    if caps[2] != caps[4] {
        return None;
    }
    let first = caps[1].parse().ok()?;
    let second = caps[3].parse().ok()?;
    let year = expand_year(&caps[5])?;
    Some((first, second, year))
}

fn textual(input: &str) -> Option<DateCandidate> {
    if let Some(caps) = TEXTUAL_DAY_FIRST.captures(input) {
        if let Some(month) = month_from_name(&caps[2]) {
            let day = caps[1].parse().ok()?;
            let year = caps[3].parse().ok()?;
            return Some(DateCandidate {
                kind: Interpretation::Textual,
                date: validated(year, month, day)?,
                source: caps[0].to_string(),
            });
        }
    }

    let caps = TEXTUAL_MONTH_FIRST.captures(input)?;
    let month = month_from_name(&caps[1])?;
    let day = caps[2].parse().ok()?;
    let year = caps[3].parse().ok()?;
    Some(DateCandidate {
        kind: Interpretation::Textual,
        date: validated(year, month, day)?,
        source: caps[0].to_string(),
    })
}

/// Build a date and confirm it round-trips to exactly the requested components.
///
/// Out-of-range input (day 31 in a 30-day month, month 13, Feb 29 in a common
/// year) yields `None` rather than rolling over into a neighbouring date.
pub(crate) fn validated(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    (date.year() == year && date.month() == month && date.day() == day).then_some(date)
}

fn expand_year(digits: &str) -> Option<i32> {
    let value: i32 = digits.parse().ok()?;
    match digits.len() {
        2 => Some(2000 + value),
        4 => Some(value),
        _ => None,
    }
}

pub(crate) fn month_from_name(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

pub(crate) fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

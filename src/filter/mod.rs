//! Retention filtering.
//!
//! Keeps records whose resolved date falls inside a trailing window ending at
//! `now`, then optionally trims the survivors to the most recent N.
//! Both steps preserve the input order.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

/// Seconds in one retention day.
const SECONDS_PER_DAY: i64 = 86_400;

/// Result of applying the retention window.
#[derive(Debug, Clone)]
pub struct Retained<T> {
    pub kept: Vec<T>,
    /// Records dropped because no date could be resolved.
    pub unresolved: usize,
    /// Records dropped because their date is older than the cutoff.
    pub outside_window: usize,
}

/// Trailing retention window.
#[derive(Debug, Clone, Copy)]
pub struct RetentionWindow {
    window_days: i64,
    now: NaiveDateTime,
}

impl RetentionWindow {
    pub fn new(window_days: i64, now: NaiveDateTime) -> Self {
        Self { window_days, now }
    }

    pub fn is_active(&self) -> bool {
        self.window_days > 0
    }

    /// `now - window_days * 86400s`, or `None` when filtering is disabled.
    pub fn cutoff(&self) -> Option<NaiveDateTime> {
        if !self.is_active() {
            return None;
        }
        let span = self
            .window_days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(TimeDelta::try_seconds);
        Some(
            span.and_then(|span| self.now.checked_sub_signed(span))
                .unwrap_or(NaiveDateTime::MIN),
        )
    }

    /// Whether a resolved date is on or after the cutoff (a date counts from its midnight).
    pub fn contains(&self, date: NaiveDate) -> bool {
        match self.cutoff() {
            None => true,
            Some(cutoff) => date
                .and_hms_opt(0, 0, 0)
                .is_some_and(|start| start >= cutoff),
        }
    }

    /// Keep records whose `date_of` exists and lies inside the window.
    ///
    /// When the window is inactive every record is kept, resolved or not.
    pub fn apply<T, F>(&self, records: Vec<T>, date_of: F) -> Retained<T>
    where
        F: Fn(&T) -> Option<NaiveDate>,
    {
        if !self.is_active() {
            return Retained {
                kept: records,
                unresolved: 0,
                outside_window: 0,
            };
        }

        let mut kept = Vec::with_capacity(records.len());
        let mut unresolved = 0usize;
        let mut outside_window = 0usize;
        for record in records {
            match date_of(&record) {
                None => unresolved += 1,
                Some(date) if self.contains(date) => kept.push(record),
                Some(_) => outside_window += 1,
            }
        }

        Retained {
            kept,
            unresolved,
            outside_window,
        }
    }
}

/// Keep only the last `limit` records (the trailing slice). Returns how many were dropped.
pub fn cap_trailing<T>(records: &mut Vec<T>, limit: Option<usize>) -> usize {
    let Some(limit) = limit else { return 0 };
    let excess = records.len().saturating_sub(limit);
    records.drain(..excess);
    excess
}

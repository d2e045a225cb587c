//! Date resolution.
//!
//! Human-entered dates arrive in many shapes. A resolver turns one raw string
//! into at most one calendar date:
//!
//! - `deterministic`: canonical policy, a pure function of the raw string
//! - `heuristic`: legacy multi-candidate policy, kept for callers that relied on
//!   its month-first fallback

pub mod deterministic;
pub mod heuristic;

use chrono::NaiveDateTime;

use crate::domain::{DateCandidate, DatePolicy, ResolvedDate};

pub use heuristic::HeuristicResolver;

/// Resolve `raw` under `policy` with no external context.
pub fn resolve(raw: &str, policy: DatePolicy) -> Option<ResolvedDate> {
    DateResolver::new(policy).resolve(raw)
}

/// Every valid interpretation of `raw` under `policy` (diagnostics).
pub fn candidates(raw: &str, policy: DatePolicy) -> Vec<DateCandidate> {
    DateResolver::new(policy).candidates(raw)
}

/// A configured resolver.
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    policy: DatePolicy,
    heuristic: HeuristicResolver,
}

impl DateResolver {
    pub fn new(policy: DatePolicy) -> Self {
        Self {
            policy,
            heuristic: HeuristicResolver::new(),
        }
    }

    /// Let a retention cutoff break DMY/MDY ties.
    ///
    /// Only the heuristic policy consults it; the deterministic policy ignores it.
    pub fn with_tie_break_cutoff(mut self, cutoff: Option<NaiveDateTime>) -> Self {
        self.heuristic = self.heuristic.with_cutoff(cutoff);
        self
    }

    pub fn resolve(&self, raw: &str) -> Option<ResolvedDate> {
        match self.policy {
            DatePolicy::Deterministic => deterministic::resolve(raw),
            DatePolicy::Heuristic => self.heuristic.resolve(raw),
        }
    }

    pub fn candidates(&self, raw: &str) -> Vec<DateCandidate> {
        match self.policy {
            DatePolicy::Deterministic => deterministic::candidates(raw),
            DatePolicy::Heuristic => self.heuristic.candidates(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn deterministic_policy_ignores_tie_break_cutoff() {
        let cutoff = NaiveDate::from_ymd_opt(2026, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0);
        let plain = DateResolver::new(DatePolicy::Deterministic);
        let with_cutoff = plain.with_tie_break_cutoff(cutoff);
        assert_eq!(plain.resolve("05/01/2026"), with_cutoff.resolve("05/01/2026"));
    }

    #[test]
    fn policies_agree_on_unambiguous_input() {
        let raw = "25/12/2025";
        let det = resolve(raw, DatePolicy::Deterministic).unwrap();
        let heu = resolve(raw, DatePolicy::Heuristic).unwrap();
        assert_eq!(det.date, heu.date);
    }

    #[test]
    fn heuristic_exposes_both_numeric_readings() {
        let kinds: Vec<_> = candidates("05/01/2026", DatePolicy::Heuristic)
            .into_iter()
            .map(|c| c.kind.label())
            .collect();
        assert!(kinds.contains(&"day-month-year"));
        assert!(kinds.contains(&"month-day-year"));
    }
}

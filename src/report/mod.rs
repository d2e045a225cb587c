//! Terminal output: end-of-run summaries and date-resolution diagnostics.
//!
//! Everything here returns a `String`; callers decide where it goes (stdout).

use crate::domain::{DateCandidate, DatePolicy, ResolvedDate, RunSummary};
use crate::output::PruneReport;

/// Samples of unresolved raw dates shown in the summary.
const MAX_UNRESOLVED_SHOWN: usize = 5;

pub fn format_run_summary(summary: &RunSummary, source: &str) -> String {
    let mut out = String::new();

    let title = if summary.dry_run { "jobdocs (dry run)" } else { "jobdocs" };
    out.push_str(&format!("=== {title} ===\n"));
    out.push_str(&format!("Source: {source}\n"));
    out.push_str(&format!(
        "Records: fetched={} already_processed={} unresolved={} outside_window={} capped={}\n",
        summary.fetched,
        summary.already_processed,
        summary.unresolved_dates,
        summary.outside_window,
        summary.capped
    ));
    out.push_str(&format!(
        "Artifacts: generated={} skipped={} failed={} pruned={}\n",
        summary.generated, summary.skipped, summary.failed, summary.pruned
    ));
    out.push_str(&format!(
        "Watermark: {}\n",
        summary.watermark.as_deref().unwrap_or("(none)")
    ));

    if !summary.unresolved_samples.is_empty() {
        out.push_str("Unresolved dates:\n");
        for raw in summary.unresolved_samples.iter().take(MAX_UNRESOLVED_SHOWN) {
            out.push_str(&format!("  {raw:?}\n"));
        }
        let shown = summary.unresolved_samples.len().min(MAX_UNRESOLVED_SHOWN);
        let rest = summary.unresolved_dates.saturating_sub(shown);
        if rest > 0 {
            out.push_str(&format!("  ... and {rest} more\n"));
        }
    }

    out
}

/// One block per raw input: every candidate, then the chosen date.
pub fn format_candidates(
    raw: &str,
    policy: DatePolicy,
    candidates: &[DateCandidate],
    chosen: Option<&ResolvedDate>,
) -> String {
    let mut out = format!("{raw:?} ({policy:?})\n");
    if candidates.is_empty() {
        out.push_str("  no valid interpretation\n");
    }
    for c in candidates {
        out.push_str(&format!(
            "  {:<15} {}  from {:?}\n",
            c.kind.label(),
            c.date.format("%Y-%m-%d"),
            c.source
        ));
    }
    match chosen {
        Some(r) => out.push_str(&format!(
            "  => {} [{}] token {}\n",
            r.date.format("%Y-%m-%d"),
            r.kind.label(),
            r.token()
        )),
        None => out.push_str("  => unresolved\n"),
    }
    out
}

pub fn format_prune_report(report: &PruneReport, dry_run: bool) -> String {
    let verb = if dry_run { "would remove" } else { "removed" };
    let mut out = format!(
        "Prune: kept={} {verb}={} failed={}\n",
        report.kept,
        report.removed.len(),
        report.failed
    );
    for path in &report.removed {
        out.push_str(&format!("  {}\n", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Interpretation;
    use chrono::NaiveDate;

    #[test]
    fn summary_lists_counts_and_truncates_unresolved_samples() {
        let summary = RunSummary {
            fetched: 9,
            generated: 2,
            skipped: 1,
            failed: 1,
            watermark: Some("7".to_string()),
            unresolved_dates: 26,
            unresolved_samples: (0..20).map(|i| format!("bad {i}")).collect(),
            ..RunSummary::default()
        };
        let text = format_run_summary(&summary, "csv:jobs.csv");
        assert!(text.contains("generated=2 skipped=1 failed=1"));
        assert!(text.contains("Watermark: 7"));
        assert!(text.contains("\"bad 4\""));
        assert!(!text.contains("\"bad 5\""));
        // Counted from every unresolved record, not just the kept samples.
        assert!(text.contains("and 21 more"));
    }

    #[test]
    fn candidates_block_shows_choice_and_token() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let candidates = vec![DateCandidate {
            kind: Interpretation::DayMonthYear,
            date,
            source: "05/01/2026".to_string(),
        }];
        let chosen = ResolvedDate {
            date,
            kind: Interpretation::DayMonthYear,
        };
        let text =
            format_candidates("05/01/2026", DatePolicy::Deterministic, &candidates, Some(&chosen));
        assert!(text.contains("day-month-year"));
        assert!(text.contains("=> 2026-01-05 [day-month-year] token 5-1-2026"));

        let none = format_candidates("31/04/2025", DatePolicy::Deterministic, &[], None);
        assert!(none.contains("no valid interpretation"));
        assert!(none.contains("=> unresolved"));
    }
}

//! One ingestion cycle, shared by `jobdocs run` and every `jobdocs poll` tick.
//!
//! 1) take the generation lock (not in dry-run)
//! 2) fetch raw records from the source
//! 3) normalize to canonical fields
//! 4) drop records at or below the watermark
//! 5) resolve dates, apply the retention window, then the trailing-N cap
//! 6) compute and validate every target filename before writing anything
//! 7) per record: render -> write -> audit -> advance the watermark
//! 8) prune, summarize, release the lock

use chrono::{Local, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::audit::{AuditRow, AuditSink};
use crate::dates::DateResolver;
use crate::domain::{
    ArtifactDescriptor, CanonicalRecord, ResolvedDate, RunConfig, RunSummary, SENTINEL_DATE_TOKEN,
    WriteMode, WriteOutcome,
};
use crate::error::AppError;
use crate::filter::{RetentionWindow, cap_trailing};
use crate::normalize::FieldMap;
use crate::output::{ArtifactWriter, GenerationLock};
use crate::render::{RenderContext, Renderer};
use crate::source::RecordSource;
use crate::state::{WatermarkCursor, WatermarkStore};

/// Unresolved raw dates kept in the summary for diagnostics.
const UNRESOLVED_SAMPLE_LIMIT: usize = 20;

/// The external pieces a cycle talks to.
pub struct Collaborators<'a> {
    pub source: &'a dyn RecordSource,
    pub fields: &'a FieldMap,
    pub renderer: &'a dyn Renderer,
    pub audit: &'a dyn AuditSink,
}

/// A record that survived filtering, with its target already computed.
struct Planned {
    record: CanonicalRecord,
    resolved: Option<ResolvedDate>,
    token: String,
    target: ArtifactDescriptor,
}

pub fn run_cycle(config: &RunConfig, collab: &Collaborators<'_>) -> Result<RunSummary, AppError> {
    run_cycle_at(config, collab, Local::now().naive_local())
}

/// Run one cycle treating `now` as the current local time.
pub fn run_cycle_at(
    config: &RunConfig,
    collab: &Collaborators<'_>,
    now: NaiveDateTime,
) -> Result<RunSummary, AppError> {
    let dry_run = config.mode == WriteMode::DryRun;
    let mut summary = RunSummary {
        dry_run,
        ..RunSummary::default()
    };

    // 1) Lock.
    let lock = if dry_run {
        None
    } else {
        Some(GenerationLock::acquire(&config.output_dir, config.stale_lock_after)?)
    };

    // 2) Fetch.
    let raw = collab.source.fetch()?;
    summary.fetched = raw.len();
    info!(source = %collab.source.describe(), records = raw.len(), "fetched records");

    // 3) Normalize.
    let records: Vec<CanonicalRecord> = raw.iter().map(|r| collab.fields.normalize(r)).collect();

    // 4) Watermark gate.
    let store = WatermarkStore::new(&config.state_dir);
    let mut cursor = WatermarkCursor::load(store, config.id_order)?;
    let records: Vec<CanonicalRecord> = if config.use_watermark {
        let (fresh, seen): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| cursor.accepts(&r.id));
        summary.already_processed = seen.len();
        fresh
    } else {
        records
    };

    // 5) Resolve, window, cap.
    let window = RetentionWindow::new(config.window_days, now);
    let tie_break = if config.heuristic_cutoff_tiebreak {
        window.cutoff()
    } else {
        None
    };
    let resolver = DateResolver::new(config.policy).with_tie_break_cutoff(tie_break);

    let resolved: Vec<(CanonicalRecord, Option<ResolvedDate>)> = records
        .into_iter()
        .map(|record| {
            let date = resolver.resolve(&record.date_raw);
            (record, date)
        })
        .collect();
    for (record, _) in resolved.iter().filter(|(_, date)| date.is_none()) {
        summary.unresolved_dates += 1;
        debug!(record_id = %record.id, raw = %record.date_raw, "date unresolved");
        if summary.unresolved_samples.len() < UNRESOLVED_SAMPLE_LIMIT {
            summary.unresolved_samples.push(record.date_raw.clone());
        }
    }

    let retained = window.apply(resolved, |(_, date)| date.map(|d| d.date));
    summary.outside_window = retained.outside_window;
    let mut kept = retained.kept;
    summary.capped = cap_trailing(&mut kept, config.last_n);

    // 6) Targets. Any malformed token aborts before the first write.
    let writer = ArtifactWriter::new(&config.output_dir, &config.extension);
    let mut planned = Vec::with_capacity(kept.len());
    for (record, resolved) in kept {
        let token = resolved
            .map(|r| r.token())
            .unwrap_or_else(|| SENTINEL_DATE_TOKEN.to_string());
        let target = writer.describe(&token, &record.name, &record.job, config.mode)?;
        planned.push(Planned {
            record,
            resolved,
            token,
            target,
        });
    }

    // 7) Generate.
    for item in &planned {
        let id = item.record.id.as_str();
        match generate(&writer, collab, item) {
            Ok(outcome) => {
                match outcome {
                    WriteOutcome::Created | WriteOutcome::Overwritten => summary.generated += 1,
                    WriteOutcome::Skipped | WriteOutcome::DryRun { would_skip: true } => {
                        summary.skipped += 1
                    }
                    WriteOutcome::DryRun { would_skip: false } => summary.generated += 1,
                }
                if !dry_run {
                    cursor.advance(id)?;
                }
            }
            Err(err) => {
                warn!(
                    record_id = id,
                    row = item.record.row_number,
                    path = %item.target.path.display(),
                    error = %err,
                    "record failed"
                );
                summary.failed += 1;
                cursor.record_failure(id)?;
            }
        }
    }

    // 8) Prune and finish.
    if let Some(keep) = config.prune_keep {
        let report = writer.prune(keep, dry_run)?;
        summary.pruned = report.removed.len();
    }
    summary.watermark = cursor.current().map(str::to_string);

    if let Some(lock) = lock {
        lock.release()?;
    }

    info!(
        generated = summary.generated,
        skipped = summary.skipped,
        failed = summary.failed,
        pruned = summary.pruned,
        dry_run,
        "cycle complete"
    );
    Ok(summary)
}

fn generate(
    writer: &ArtifactWriter,
    collab: &Collaborators<'_>,
    item: &Planned,
) -> Result<WriteOutcome, AppError> {
    let ctx = RenderContext {
        record: &item.record,
        resolved: item.resolved.as_ref(),
        date_token: &item.token,
    };
    let bytes = collab.renderer.render(&ctx)?;
    let outcome = writer.write(&item.target, &bytes)?;

    if matches!(outcome, WriteOutcome::Created | WriteOutcome::Overwritten) {
        collab
            .audit
            .append(&AuditRow::new(&item.record, item.resolved.as_ref(), Utc::now()));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::path::Path;

    use chrono::NaiveDate;
    use tempfile::tempdir;

    use crate::audit::NullAuditSink;
    use crate::domain::{DatePolicy, IdOrder, RawRecord};
    use crate::error::ErrorKind;
    use crate::render::RenderError;

    struct VecSource(Vec<RawRecord>);

    impl RecordSource for VecSource {
        fn fetch(&self) -> Result<Vec<RawRecord>, AppError> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingSink(RefCell<Vec<AuditRow>>);

    impl AuditSink for RecordingSink {
        fn append(&self, row: &AuditRow) {
            self.0.borrow_mut().push(row.clone());
        }
    }

    fn job(id: &str, date: &str, name: &str, job: &str, row: usize) -> RawRecord {
        RawRecord::from_pairs(
            [("ID", id), ("Date", date), ("Name", name), ("Job Number", job)],
            row,
        )
    }

    fn config(root: &Path) -> RunConfig {
        RunConfig {
            output_dir: root.join("out"),
            state_dir: root.join("state"),
            extension: "txt".to_string(),
            policy: DatePolicy::Deterministic,
            heuristic_cutoff_tiebreak: false,
            window_days: 0,
            last_n: None,
            prune_keep: None,
            mode: WriteMode::SkipIfExists,
            id_order: IdOrder::Numeric,
            use_watermark: true,
            stale_lock_after: None,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn name_renderer(ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
        Ok(format!("{} {}", ctx.record.name, ctx.date_token).into_bytes())
    }

    struct FailingSource;

    impl RecordSource for FailingSource {
        fn fetch(&self) -> Result<Vec<RawRecord>, AppError> {
            Err(AppError::fetch("endpoint returned 503"))
        }

        fn describe(&self) -> String {
            "unreachable".to_string()
        }
    }

    fn run(
        config: &RunConfig,
        source: &dyn RecordSource,
        renderer: &dyn Renderer,
        audit: &dyn AuditSink,
    ) -> Result<RunSummary, AppError> {
        let fields = FieldMap::default();
        let collab = Collaborators {
            source,
            fields: &fields,
            renderer,
            audit,
        };
        run_cycle_at(config, &collab, now())
    }

    #[test]
    fn scenario_record_lands_at_day_month_year_path() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());
        let source = VecSource(vec![RawRecord::from_pairs(
            [("Date", "5/1/26"), ("Name", "J Smith"), ("Job Number", "42")],
            1,
        )]);

        let summary = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("cycle");
        assert_eq!(summary.generated, 1);
        let path = cfg.output_dir.join("5-1-2026-J_Smith-42.txt");
        assert_eq!(std::fs::read_to_string(&path).expect("artifact"), "J Smith 5-1-2026");
        // No identifier column: the row number stands in.
        assert_eq!(summary.watermark.as_deref(), Some("1"));
        assert!(!GenerationLock::marker_path(&cfg.output_dir).exists());
    }

    #[test]
    fn second_cycle_skips_processed_records() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());
        let source = VecSource(vec![job("1", "5/1/26", "J Smith", "42", 1)]);

        run(&cfg, &source, &name_renderer, &NullAuditSink).expect("first");
        let again = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("second");
        assert_eq!(again.already_processed, 1);
        assert_eq!(again.generated, 0);

        // Without the watermark the existing file is still not rewritten.
        let cfg = RunConfig {
            use_watermark: false,
            ..cfg
        };
        let third = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("third");
        assert_eq!(third.skipped, 1);
        assert_eq!(third.generated, 0);
    }

    #[test]
    fn force_overwrite_rewrites_existing_artifacts() {
        let dir = tempdir().expect("tempdir");
        let cfg = RunConfig {
            mode: WriteMode::ForceOverwrite,
            use_watermark: false,
            ..config(dir.path())
        };
        let source = VecSource(vec![job("1", "5/1/26", "J Smith", "42", 1)]);

        run(&cfg, &source, &name_renderer, &NullAuditSink).expect("first");
        let again = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("second");
        assert_eq!(again.generated, 1);
        assert_eq!(again.skipped, 0);
    }

    #[test]
    fn failed_record_is_retried_next_cycle() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());
        let source = VecSource(vec![
            job("1", "5/1/26", "A", "1", 1),
            job("2", "6/1/26", "B", "2", 2),
            job("3", "7/1/26", "C", "3", 3),
        ]);

        let failing = |ctx: &RenderContext<'_>| {
            if ctx.record.id == "2" {
                Err(RenderError("template exploded".to_string()))
            } else {
                name_renderer(ctx)
            }
        };
        let first = run(&cfg, &source, &failing, &NullAuditSink).expect("first");
        assert_eq!((first.generated, first.failed), (2, 1));
        assert_eq!(first.watermark.as_deref(), Some("1"));

        let second = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("second");
        assert_eq!(second.already_processed, 1);
        assert_eq!((second.generated, second.skipped, second.failed), (1, 1, 0));
        assert_eq!(second.watermark.as_deref(), Some("3"));
    }

    #[test]
    fn failure_below_an_earlier_success_is_retried() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());
        let source = VecSource(vec![
            job("12", "6/1/26", "B", "12", 1),
            job("11", "5/1/26", "A", "11", 2),
        ]);

        let failing = |ctx: &RenderContext<'_>| {
            if ctx.record.id == "11" {
                Err(RenderError("template exploded".to_string()))
            } else {
                name_renderer(ctx)
            }
        };
        let first = run(&cfg, &source, &failing, &NullAuditSink).expect("first");
        assert_eq!((first.generated, first.failed), (1, 1));
        assert_eq!(first.watermark, None);

        let second = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("second");
        assert_eq!((second.generated, second.skipped, second.failed), (1, 1, 0));
        assert!(cfg.output_dir.join("5-1-2026-A-11.txt").exists());
        assert_eq!(second.watermark.as_deref(), Some("12"));
    }

    #[test]
    fn fetch_failure_releases_the_lock() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());

        let err = run(&cfg, &FailingSource, &name_renderer, &NullAuditSink).expect_err("fetch");
        assert_eq!(err.kind(), ErrorKind::SourceFetch);
        assert!(!GenerationLock::marker_path(&cfg.output_dir).exists());

        // The next cycle can take the lock again.
        let source = VecSource(vec![job("1", "5/1/26", "J Smith", "42", 1)]);
        run(&cfg, &source, &name_renderer, &NullAuditSink).expect("next cycle");
    }

    #[test]
    fn malformed_token_aborts_the_batch_before_any_write() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());
        // A three-digit ISO year yields `5-1-999`, which fails the D-M-YYYY check.
        let source = VecSource(vec![
            job("1", "5/1/26", "J Smith", "42", 1),
            job("2", "0999-01-05", "A Typo", "43", 2),
        ]);

        let err = run(&cfg, &source, &name_renderer, &NullAuditSink).expect_err("integrity");
        assert_eq!(err.kind(), ErrorKind::FilenameIntegrity);
        assert!(!cfg.output_dir.join("5-1-2026-J_Smith-42.txt").exists());
        assert!(!cfg.state_dir.exists());
        assert!(!GenerationLock::marker_path(&cfg.output_dir).exists());
    }

    #[test]
    fn impossible_date_is_excluded_or_gets_sentinel_token() {
        let dir = tempdir().expect("tempdir");
        let source = VecSource(vec![job("1", "31/04/2025", "J Smith", "42", 1)]);

        let windowed = RunConfig {
            window_days: 30,
            ..config(dir.path())
        };
        let summary = run(&windowed, &source, &name_renderer, &NullAuditSink).expect("windowed");
        assert_eq!(summary.unresolved_dates, 1);
        assert_eq!(summary.generated, 0);
        assert_eq!(summary.unresolved_samples, vec!["31/04/2025".to_string()]);

        let open = config(dir.path());
        let summary = run(&open, &source, &name_renderer, &NullAuditSink).expect("open");
        assert_eq!(summary.generated, 1);
        assert!(open.output_dir.join("0-0-0000-J_Smith-42.txt").exists());
    }

    #[test]
    fn window_and_cap_keep_recent_records_in_order() {
        let dir = tempdir().expect("tempdir");
        let cfg = RunConfig {
            window_days: 7,
            last_n: Some(1),
            ..config(dir.path())
        };
        let source = VecSource(vec![
            job("1", "1/12/25", "Old", "1", 1),
            job("2", "5/1/26", "A", "2", 2),
            job("3", "8/1/26", "B", "3", 3),
        ]);

        let summary = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("cycle");
        assert_eq!(summary.outside_window, 1);
        assert_eq!(summary.capped, 1);
        assert_eq!(summary.generated, 1);
        assert!(cfg.output_dir.join("8-1-2026-B-3.txt").exists());
    }

    #[test]
    fn held_lock_aborts_without_side_effects() {
        let dir = tempdir().expect("tempdir");
        let cfg = config(dir.path());
        std::fs::create_dir_all(&cfg.output_dir).expect("mkdir");
        std::fs::write(GenerationLock::marker_path(&cfg.output_dir), "{}").expect("marker");

        let rendered = Cell::new(false);
        let renderer = |ctx: &RenderContext<'_>| {
            rendered.set(true);
            name_renderer(ctx)
        };
        let source = VecSource(vec![job("1", "5/1/26", "J Smith", "42", 1)]);
        let err = run(&cfg, &source, &renderer, &NullAuditSink).expect_err("lock held");
        assert_eq!(err.kind(), ErrorKind::LockContention);
        assert!(!rendered.get());
        assert!(!cfg.output_dir.join("5-1-2026-J_Smith-42.txt").exists());
        assert!(!cfg.state_dir.exists());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = tempdir().expect("tempdir");
        let cfg = RunConfig {
            mode: WriteMode::DryRun,
            prune_keep: Some(0),
            ..config(dir.path())
        };
        let sink = RecordingSink::default();
        let source = VecSource(vec![job("1", "5/1/26", "J Smith", "42", 1)]);

        let summary = run(&cfg, &source, &name_renderer, &sink).expect("dry run");
        assert!(summary.dry_run);
        assert_eq!(summary.generated, 1);
        assert!(!cfg.output_dir.exists());
        assert!(!cfg.state_dir.exists());
        assert!(sink.0.borrow().is_empty());
    }

    #[test]
    fn audit_rows_only_for_new_artifacts() {
        let dir = tempdir().expect("tempdir");
        let cfg = RunConfig {
            use_watermark: false,
            ..config(dir.path())
        };
        let sink = RecordingSink::default();
        let source = VecSource(vec![job("1", "5/1/26", "J Smith", "42", 1)]);

        run(&cfg, &source, &name_renderer, &sink).expect("first");
        run(&cfg, &source, &name_renderer, &sink).expect("second");
        let rows = sink.0.borrow();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, "2026-01-05");
    }

    #[test]
    fn prune_trims_output_to_retain_count() {
        let dir = tempdir().expect("tempdir");
        let cfg = RunConfig {
            prune_keep: Some(1),
            ..config(dir.path())
        };
        let source = VecSource(vec![
            job("1", "5/1/26", "A", "1", 1),
            job("2", "6/1/26", "B", "2", 2),
            job("3", "7/1/26", "C", "3", 3),
        ]);

        let summary = run(&cfg, &source, &name_renderer, &NullAuditSink).expect("cycle");
        assert_eq!(summary.generated, 3);
        assert_eq!(summary.pruned, 2);
        let left = std::fs::read_dir(&cfg.output_dir)
            .expect("read_dir")
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|x| x == "txt"))
            .count();
        assert_eq!(left, 1);
    }
}

//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - initializes logging
//! - builds the run configuration and collaborators
//! - runs one cycle, a poll loop, or a maintenance command
//! - prints summaries to stdout

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};

use crate::audit::{AuditSink, AuditSinks, CsvAuditSink, NullAuditSink, WebhookAuditSink};
use crate::cli::{Command, PollArgs, PruneArgs, ResolveArgs, RunArgs, SourceArgs};
use crate::domain::{RunConfig, RunSummary, WriteMode};
use crate::error::{AppError, ErrorKind};
use crate::logging::{LogConfig, init_logging};
use crate::normalize::FieldMap;
use crate::output::{ArtifactWriter, GenerationLock, install_signal_release};
use crate::render::PlaceholderTemplate;
use crate::source::{CsvFileSource, EventLogSource, RecordSource, SheetSource};

pub mod pipeline;

use pipeline::Collaborators;

/// State directory name used under the output directory when none is given.
const DEFAULT_STATE_DIR: &str = ".jobdocs";

/// Entry point for the `jobdocs` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    init_logging(&LogConfig::from_flags(cli.verbose, cli.quiet, cli.log_format));

    match cli.command {
        Command::Run(args) => handle_run(&args),
        Command::Poll(args) => handle_poll(&args),
        Command::Resolve(args) => handle_resolve(&args),
        Command::Prune(args) => handle_prune(&args),
    }
}

/// Everything a cycle needs, built once per invocation.
struct Runner {
    config: RunConfig,
    source: Box<dyn RecordSource>,
    fields: FieldMap,
    template: PlaceholderTemplate,
    audit: Box<dyn AuditSink>,
}

impl Runner {
    fn from_args(args: &RunArgs) -> Result<Self, AppError> {
        let config = run_config_from_args(args)?;
        let template_path = args.template.as_deref().ok_or_else(|| {
            AppError::config("No template given (--template or JOBDOCS_TEMPLATE).")
        })?;
        Ok(Self {
            source: build_source(&args.source)?,
            fields: build_field_map(args)?,
            template: PlaceholderTemplate::from_file(template_path)?,
            audit: build_audit(args)?,
            config,
        })
    }

    fn cycle(&self) -> Result<RunSummary, AppError> {
        let collab = Collaborators {
            source: self.source.as_ref(),
            fields: &self.fields,
            renderer: &self.template,
            audit: self.audit.as_ref(),
        };
        pipeline::run_cycle(&self.config, &collab)
    }
}

fn handle_run(args: &RunArgs) -> Result<(), AppError> {
    let runner = Runner::from_args(args)?;
    install_signal_release()?;

    let summary = runner.cycle()?;
    println!(
        "{}",
        crate::report::format_run_summary(&summary, &runner.source.describe())
    );
    Ok(())
}

fn handle_poll(args: &PollArgs) -> Result<(), AppError> {
    let runner = Runner::from_args(&args.run)?;
    install_signal_release()?;

    let interval = Duration::from_secs(args.interval_secs.max(1));
    let source = runner.source.describe();
    info!(interval_secs = interval.as_secs(), source = %source, "polling");

    poll_cycles(interval, args.max_cycles, || {
        let summary = runner.cycle()?;
        println!("{}", crate::report::format_run_summary(&summary, &source));
        Ok(summary)
    })
}

/// Run `cycle` every `interval` until `max_cycles` is reached or a fatal error.
///
/// A failed fetch or a busy lock skips the tick; any other error ends polling.
fn poll_cycles<F>(interval: Duration, max_cycles: Option<u64>, mut cycle: F) -> Result<(), AppError>
where
    F: FnMut() -> Result<RunSummary, AppError>,
{
    let mut cycles = 0u64;
    loop {
        let started = Instant::now();
        match cycle() {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::SourceFetch => {
                warn!(error = %err, "source fetch failed; retrying next cycle");
            }
            Err(err) if err.kind() == ErrorKind::LockContention => {
                warn!(error = %err, "generation lock busy; skipping this cycle");
            }
            Err(err) => {
                error!(error = %err, "cycle aborted");
                return Err(err);
            }
        }

        cycles += 1;
        if max_cycles.is_some_and(|max| cycles >= max) {
            return Ok(());
        }
        thread::sleep(interval.saturating_sub(started.elapsed()));
    }
}

fn handle_resolve(args: &ResolveArgs) -> Result<(), AppError> {
    let resolver = crate::dates::DateResolver::new(args.policy);

    if args.json {
        let rows: Vec<serde_json::Value> = args
            .raw
            .iter()
            .map(|raw| {
                serde_json::json!({
                    "raw": raw,
                    "candidates": resolver.candidates(raw),
                    "resolved": resolver.resolve(raw),
                    "token": resolver.resolve(raw).map(|r| r.token()),
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&rows)
            .map_err(|e| AppError::io(format!("Failed to serialize resolution report: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    for raw in &args.raw {
        let candidates = resolver.candidates(raw);
        let chosen = resolver.resolve(raw);
        print!(
            "{}",
            crate::report::format_candidates(raw, args.policy, &candidates, chosen.as_ref())
        );
    }
    Ok(())
}

fn handle_prune(args: &PruneArgs) -> Result<(), AppError> {
    let output_dir = require_output_dir(args.output_dir.as_deref())?;
    let writer = ArtifactWriter::new(output_dir, &args.ext);

    let lock = if args.dry_run {
        None
    } else {
        install_signal_release()?;
        Some(GenerationLock::acquire(output_dir, stale_after(args.stale_lock_secs))?)
    };
    let report = writer.prune(args.keep, args.dry_run)?;
    if let Some(lock) = lock {
        lock.release()?;
    }

    print!("{}", crate::report::format_prune_report(&report, args.dry_run));
    Ok(())
}

/// Translate CLI flags into the pipeline's configuration.
pub fn run_config_from_args(args: &RunArgs) -> Result<RunConfig, AppError> {
    let output_dir = require_output_dir(args.output_dir.as_deref())?.to_path_buf();
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| output_dir.join(DEFAULT_STATE_DIR));

    let extension = args.ext.trim().trim_start_matches('.').to_string();
    if extension.is_empty() {
        return Err(AppError::config("Artifact extension (--ext) must not be empty."));
    }

    let mode = if args.dry_run {
        WriteMode::DryRun
    } else if args.force {
        WriteMode::ForceOverwrite
    } else {
        WriteMode::SkipIfExists
    };

    Ok(RunConfig {
        output_dir,
        state_dir,
        extension,
        policy: args.policy,
        heuristic_cutoff_tiebreak: args.heuristic_cutoff_tiebreak,
        window_days: args.window_days,
        last_n: args.last,
        prune_keep: args.prune,
        mode,
        id_order: args.id_order,
        use_watermark: !args.ignore_watermark,
        stale_lock_after: stale_after(args.stale_lock_secs),
    })
}

fn require_output_dir(dir: Option<&Path>) -> Result<&Path, AppError> {
    dir.ok_or_else(|| {
        AppError::config("No output directory given (--output-dir or JOBDOCS_OUTPUT_DIR).")
    })
}

fn stale_after(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn build_source(args: &SourceArgs) -> Result<Box<dyn RecordSource>, AppError> {
    if let Some(path) = &args.csv {
        return Ok(Box::new(CsvFileSource::new(path)));
    }
    if let Some(path) = &args.events {
        return Ok(Box::new(EventLogSource::new(path)));
    }
    if let Some(url) = &args.sheet_url {
        return Ok(Box::new(SheetSource::new(url, args.sheet_token.clone())?));
    }
    let sheet = SheetSource::from_env().map_err(|_| {
        AppError::config(
            "No record source given (--csv, --events, --sheet-url or JOBDOCS_SHEET_URL).",
        )
    })?;
    Ok(Box::new(sheet))
}

fn build_field_map(args: &RunArgs) -> Result<FieldMap, AppError> {
    let map = match &args.field_map {
        Some(path) => FieldMap::from_json_file(path)?,
        None => FieldMap::default(),
    };
    Ok(args
        .columns
        .iter()
        .fold(map, |map, (field, index)| map.with_position(*field, *index)))
}

fn build_audit(args: &RunArgs) -> Result<Box<dyn AuditSink>, AppError> {
    let mut sinks = AuditSinks::default();
    if let Some(path) = &args.audit_csv {
        sinks.push(Box::new(CsvAuditSink::new(path)));
    }
    if let Some(url) = args.audit_url.as_deref().filter(|u| !u.trim().is_empty()) {
        sinks.push(Box::new(WebhookAuditSink::new(url)?));
    }
    if sinks.is_empty() {
        Ok(Box::new(NullAuditSink))
    } else {
        Ok(Box::new(sinks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::cli::Cli;
    use crate::domain::{CanonicalField, RawRecord};

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["jobdocs", "run", "--csv", "jobs.csv"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn config_defaults_and_modes() {
        let args = run_args(&["--output-dir", "out", "--ext", ".pdf"]);
        let cfg = run_config_from_args(&args).expect("config");
        assert_eq!(cfg.state_dir, PathBuf::from("out").join(".jobdocs"));
        assert_eq!(cfg.extension, "pdf");
        assert_eq!(cfg.mode, WriteMode::SkipIfExists);
        assert_eq!(cfg.stale_lock_after, Some(Duration::from_secs(21_600)));
        assert!(cfg.use_watermark);

        let cfg = run_config_from_args(&run_args(&[
            "--output-dir",
            "out",
            "--force",
            "--dry-run",
            "--stale-lock-secs",
            "0",
            "--ignore-watermark",
        ]))
        .expect("config");
        assert_eq!(cfg.mode, WriteMode::DryRun);
        assert_eq!(cfg.stale_lock_after, None);
        assert!(!cfg.use_watermark);
    }

    #[test]
    fn missing_template_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = dir.path().join("missing.txt");
        let template = template.to_str().expect("utf8");
        let args = run_args(&["--output-dir", "out", "--template", template]);
        let err = Runner::from_args(&args).err().expect("missing template");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn poll_skips_fetch_and_lock_failures_and_stops_on_fatal_errors() {
        let mut results = vec![
            Err(AppError::fetch("sheet unreachable")),
            Err(AppError::new(ErrorKind::LockContention, "held by pid 7")),
            Ok(RunSummary::default()),
        ]
        .into_iter();
        let mut calls = 0;
        poll_cycles(Duration::ZERO, Some(3), || {
            calls += 1;
            results.next().expect("one result per cycle")
        })
        .expect("recoverable errors do not stop polling");
        assert_eq!(calls, 3);

        let mut calls = 0;
        let err = poll_cycles(Duration::ZERO, Some(5), || {
            calls += 1;
            Err(AppError::io("watermark unwritable"))
        })
        .expect_err("fatal");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(calls, 1);
    }

    #[test]
    fn column_flags_override_header_lookup() {
        let args = run_args(&["--output-dir", "out", "--column", "name=2"]);
        let map = build_field_map(&args).expect("field map");
        assert_eq!(map.position(CanonicalField::Name), Some(2));

        let raw = RawRecord::from_row(
            &["Name".to_string(), "Date".to_string(), "Name".to_string()],
            vec!["Office".into(), "5/1/26".into(), "J Smith".into()],
            1,
        );
        assert_eq!(map.normalize(&raw).name, "J Smith");
    }
}

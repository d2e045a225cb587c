//! Command-line parsing.
//!
//! Parsing and dispatch stay apart from the pipeline; `app` turns these
//! structs into a `RunConfig` plus concrete collaborators.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::domain::{CanonicalField, DatePolicy, IdOrder};
use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "jobdocs", version, about = "Generate one document per job record, exactly once")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug-level diagnostics on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Warnings and errors only.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Human)]
    pub log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one ingestion cycle and exit.
    Run(RunArgs),
    /// Run ingestion cycles on a fixed interval.
    Poll(PollArgs),
    /// Show how raw date strings resolve.
    Resolve(ResolveArgs),
    /// Prune the output directory without ingesting.
    Prune(PruneArgs),
}

/// Where records come from. At most one; with none, `JOBDOCS_SHEET_URL` is used.
#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("source").args(["csv", "sheet_url", "events"]).multiple(false)))]
pub struct SourceArgs {
    /// CSV export with a header row.
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Spreadsheet values endpoint (JSON `{"values": [[...], ...]}`).
    #[arg(long, value_name = "URL")]
    pub sheet_url: Option<String>,

    /// Bearer token for `--sheet-url`.
    #[arg(long, env = "JOBDOCS_SHEET_TOKEN", hide_env_values = true)]
    pub sheet_token: Option<String>,

    /// JSON-lines file of pushed form events.
    #[arg(long, value_name = "PATH")]
    pub events: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Template with `{{ field }}` placeholders.
    #[arg(long, value_name = "PATH", env = "JOBDOCS_TEMPLATE")]
    pub template: Option<PathBuf>,

    /// Directory artifacts are written to.
    #[arg(long, value_name = "DIR", env = "JOBDOCS_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory holding the watermark (default: `<output-dir>/.jobdocs`).
    #[arg(long, value_name = "DIR", env = "JOBDOCS_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Artifact file extension.
    #[arg(long, default_value = "txt")]
    pub ext: String,

    /// Keep only records dated within the last N days (0 disables).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub window_days: i64,

    /// Keep only the most recent N records after the window.
    #[arg(long, value_name = "N")]
    pub last: Option<usize>,

    /// After generating, keep only the N newest artifacts.
    #[arg(long, value_name = "N")]
    pub prune: Option<usize>,

    /// Overwrite artifacts that already exist.
    #[arg(long)]
    pub force: bool,

    /// Compute and log everything; touch nothing.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value_t = DatePolicy::Deterministic)]
    pub policy: DatePolicy,

    /// Heuristic policy only: prefer the month-first reading when only it falls inside the window.
    #[arg(long)]
    pub heuristic_cutoff_tiebreak: bool,

    /// How record identifiers are ordered for the watermark.
    #[arg(long, value_enum, default_value_t = IdOrder::Numeric)]
    pub id_order: IdOrder,

    /// Process records even if the watermark says they were done.
    #[arg(long)]
    pub ignore_watermark: bool,

    /// Reclaim lock markers older than this many seconds (0 never reclaims).
    #[arg(long, default_value_t = 21_600)]
    pub stale_lock_secs: u64,

    /// JSON file with extra header spellings and column positions.
    #[arg(long, value_name = "PATH")]
    pub field_map: Option<PathBuf>,

    /// Read FIELD from a zero-based column, e.g. `--column job=3`.
    #[arg(long = "column", value_name = "FIELD=INDEX", value_parser = parse_column)]
    pub columns: Vec<(CanonicalField, usize)>,

    /// Append an audit row per generated artifact to this CSV file.
    #[arg(long, value_name = "PATH")]
    pub audit_csv: Option<PathBuf>,

    /// POST an audit row per generated artifact to this URL.
    #[arg(long, value_name = "URL", env = "JOBDOCS_AUDIT_URL")]
    pub audit_url: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Seconds between cycle starts.
    #[arg(long, default_value_t = 300)]
    pub interval_secs: u64,

    /// Stop after this many cycles.
    #[arg(long)]
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct ResolveArgs {
    /// Raw date strings.
    #[arg(required = true)]
    pub raw: Vec<String>,

    #[arg(long, value_enum, default_value_t = DatePolicy::Deterministic)]
    pub policy: DatePolicy,

    /// Emit JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PruneArgs {
    #[arg(long, value_name = "DIR", env = "JOBDOCS_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value = "txt")]
    pub ext: String,

    /// Number of newest artifacts to keep.
    #[arg(long)]
    pub keep: usize,

    /// List what would be removed.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value_t = 21_600)]
    pub stale_lock_secs: u64,
}

fn parse_column(s: &str) -> Result<(CanonicalField, usize), String> {
    let (field, index) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=INDEX, got '{s}'"))?;
    let field: CanonicalField = field.parse()?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid column index '{index}': {e}"))?;
    Ok((field, index))
}

//! Logging setup.
//!
//! stdout is reserved for command output (summaries, resolve reports).
//! All diagnostics go to stderr, either human-readable or as JSON lines.
//!
//! Level precedence: `RUST_LOG` (full filter syntax), then `JOBDOCS_LOG`,
//! then the CLI flags.

use std::io::IsTerminal;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// `--verbose` wins over `--quiet`.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else if quiet {
            LogLevel::Warn
        } else {
            LogLevel::Info
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogConfig {
    /// CLI flags, overridden by `JOBDOCS_LOG` when it parses.
    pub fn from_flags(verbose: bool, quiet: bool, format: LogFormat) -> Self {
        let level = std::env::var("JOBDOCS_LOG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| LogLevel::from_flags(verbose, quiet));
        Self { format, level }
    }

    pub fn filter_directive(&self) -> String {
        format!("jobdocs={}", self.level)
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let result = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .flatten_event(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
    };
    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_beats_quiet() {
        assert_eq!(LogLevel::from_flags(true, true), LogLevel::Debug);
        assert_eq!(LogLevel::from_flags(false, true), LogLevel::Warn);
        assert_eq!(LogLevel::from_flags(false, false), LogLevel::Info);
    }

    #[test]
    fn directive_targets_this_crate() {
        let config = LogConfig {
            format: LogFormat::Json,
            level: LogLevel::Warn,
        };
        assert_eq!(config.filter_directive(), "jobdocs=warn");
    }
}

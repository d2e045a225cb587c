//! Artifact writer.
//!
//! Filenames are a pure function of `(date token, name, job)`:
//!
//! `{D-M-YYYY}-{Sanitized_Name}-{Sanitized_Job}.{ext}`
//!
//! so regenerating a record always targets the same path. Writes go to a hidden
//! temporary file in the output directory, are synced, then renamed into place.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{ArtifactDescriptor, WriteMode, WriteOutcome};
use crate::error::{AppError, ErrorKind};

static DATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}-\d{1,2}-\d{4}$").expect("date token pattern is valid"));

/// Characters that are unsafe in filenames on at least one common platform.
const PATH_HOSTILE: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Used when a name or job component sanitizes to nothing.
const EMPTY_COMPONENT: &str = "unknown";

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("date token '{token}' does not match D-M-YYYY; refusing to write '{file_name}'")]
    MalformedDateToken { token: String, file_name: String },
    #[error("failed to write artifact '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<WriteError> for AppError {
    fn from(err: WriteError) -> Self {
        let kind = match err {
            WriteError::MalformedDateToken { .. } => ErrorKind::FilenameIntegrity,
            WriteError::Io { .. } => ErrorKind::Io,
        };
        AppError::new(kind, err.to_string())
    }
}

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: usize,
    /// Removed (or, in dry-run, would be removed) newest-first.
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

/// Strip path-hostile characters and collapse whitespace runs into `_`.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !PATH_HOSTILE.contains(c) && (c.is_whitespace() || !c.is_control()))
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let trimmed = joined.trim_matches('.');
    if trimmed.is_empty() {
        EMPTY_COMPONENT.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_valid_date_token(token: &str) -> bool {
    DATE_TOKEN.is_match(token)
}

/// Whether `file_name` has the composed artifact shape `{D-M-YYYY}-{name}-{job}.{extension}`.
pub fn is_artifact_file_name(file_name: &str, extension: &str) -> bool {
    let Some(stem) = file_name
        .strip_suffix(extension)
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return false;
    };
    let parts: Vec<&str> = stem.splitn(4, '-').collect();
    parts.len() == 4 && is_valid_date_token(&parts[..3].join("-"))
}

pub fn compose_file_name(date_token: &str, name: &str, job: &str, extension: &str) -> String {
    format!(
        "{date_token}-{}-{}.{extension}",
        sanitize_component(name),
        sanitize_component(job)
    )
}

/// Writes artifacts into a single output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    extension: String,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            output_dir: output_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Compute the target for one record and validate its date token.
    pub fn describe(
        &self,
        date_token: &str,
        name: &str,
        job: &str,
        mode: WriteMode,
    ) -> Result<ArtifactDescriptor, WriteError> {
        let file_name = compose_file_name(date_token, name, job, &self.extension);
        if !is_valid_date_token(date_token) {
            return Err(WriteError::MalformedDateToken {
                token: date_token.to_string(),
                file_name,
            });
        }
        let path = self.output_dir.join(file_name);
        Ok(ArtifactDescriptor {
            exists: path.exists(),
            path,
            mode,
        })
    }

    /// Write `bytes` to the descriptor's target according to its mode.
    pub fn write(
        &self,
        descriptor: &ArtifactDescriptor,
        bytes: &[u8],
    ) -> Result<WriteOutcome, WriteError> {
        let path = &descriptor.path;
        let exists = path.exists();

        let outcome = match descriptor.mode {
            WriteMode::DryRun => {
                info!(
                    path = %path.display(),
                    bytes = bytes.len(),
                    exists,
                    "dry-run: would write artifact"
                );
                return Ok(WriteOutcome::DryRun { would_skip: exists });
            }
            WriteMode::SkipIfExists if exists => {
                debug!(path = %path.display(), "artifact exists; skipped");
                return Ok(WriteOutcome::Skipped);
            }
            WriteMode::SkipIfExists => WriteOutcome::Created,
            WriteMode::ForceOverwrite if exists => WriteOutcome::Overwritten,
            WriteMode::ForceOverwrite => WriteOutcome::Created,
        };

        write_durably(path, bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), ?outcome, "artifact written");
        Ok(outcome)
    }

    /// Keep the `retain` most recently modified artifacts and delete the rest.
    ///
    /// A failed deletion is logged and counted; pruning continues.
    pub fn prune(&self, retain: usize, dry_run: bool) -> Result<PruneReport, WriteError> {
        let mut artifacts = self.list_artifacts()?;
        // Newest first; name breaks ties so the order is stable.
        artifacts.sort_by(|(a_path, a_time), (b_path, b_time)| {
            b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
        });

        let mut report = PruneReport {
            kept: artifacts.len().min(retain),
            ..PruneReport::default()
        };

        for (path, _) in artifacts.into_iter().skip(retain) {
            if dry_run {
                info!(path = %path.display(), "dry-run: would prune artifact");
                report.removed.push(path);
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "pruned artifact");
                    report.removed.push(path);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to prune artifact");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn list_artifacts(&self) -> Result<Vec<(PathBuf, SystemTime)>, WriteError> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(WriteError::Io {
                    path: self.output_dir.clone(),
                    source,
                });
            }
        };

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            // Hidden temp files and the lock marker never match this shape.
            if !is_artifact_file_name(&file_name, &self.extension) {
                continue;
            }
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, modified));
        }
        Ok(out)
    }
}

fn write_durably(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let io_err = |source: std::io::Error| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.tmp"));
    let result = (|| {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(err));
    }
    Ok(())
}

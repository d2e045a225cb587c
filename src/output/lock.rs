//! Generation lock.
//!
//! An advisory marker file in the output directory. Creating it with
//! `create_new` is the ownership test: if the file already exists another runner
//! owns the directory and we fail fast. The marker records who owns it so an
//! operator can tell a live runner from a leftover.
//!
//! The marker is removed when the guard drops and, via [`install_signal_release`],
//! on SIGINT/SIGTERM. A hard kill still leaks it; markers older than the
//! configured staleness threshold are reclaimed on the next acquire.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{AppError, ErrorKind};

const LOCK_FILE: &str = ".jobdocs.lock";

/// Markers currently held by this process, released by the signal handler.
static HELD: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

#[derive(Debug, Error)]
pub enum LockError {
    #[error("generation lock '{path}' is already held ({owner}); another run is in progress")]
    Held { path: PathBuf, owner: String },
    #[error("failed to manage generation lock '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        let kind = match err {
            LockError::Held { .. } => ErrorKind::LockContention,
            LockError::Io { .. } => ErrorKind::Io,
        };
        AppError::new(kind, err.to_string())
    }
}

/// Ownership metadata stored inside the marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pid {} on {} since {}",
            self.pid,
            self.host,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Held generation lock. Dropping it removes the marker.
#[derive(Debug)]
pub struct GenerationLock {
    path: PathBuf,
    released: bool,
}

impl GenerationLock {
    pub fn marker_path(dir: &Path) -> PathBuf {
        dir.join(LOCK_FILE)
    }

    pub fn acquire(dir: &Path, stale_after: Option<Duration>) -> Result<Self, LockError> {
        Self::acquire_at(dir, stale_after, SystemTime::now())
    }

    /// Acquire the lock, treating `now` as the current time for staleness checks.
    pub fn acquire_at(
        dir: &Path,
        stale_after: Option<Duration>,
        now: SystemTime,
    ) -> Result<Self, LockError> {
        let path = Self::marker_path(dir);
        let io_err = |source: std::io::Error| LockError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let mut reclaimed = false;
        loop {
            let file = OpenOptions::new().create_new(true).write(true).open(&path);
            match file {
                Ok(mut handle) => {
                    let owner = LockOwner::current();
                    let body = serde_json::to_vec(&owner).map_err(|e| io_err(e.into()))?;
                    handle.write_all(&body).map_err(io_err)?;
                    handle.sync_all().map_err(io_err)?;
                    register(&path);
                    debug!(path = %path.display(), %owner, "generation lock acquired");
                    return Ok(Self {
                        path: path.clone(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = describe_owner(&path);
                    if !reclaimed && is_stale(&path, stale_after, now) {
                        warn!(
                            path = %path.display(),
                            owner = %owner,
                            "reclaiming stale generation lock"
                        );
                        match fs::remove_file(&path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(io_err(e)),
                        }
                        reclaimed = true;
                        continue;
                    }
                    return Err(LockError::Held {
                        path: path.clone(),
                        owner,
                    });
                }
                Err(err) => return Err(io_err(err)),
            }
        }
    }

    /// Remove the marker now, reporting failure instead of swallowing it.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        unregister(&self.path);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for GenerationLock {
    fn drop(&mut self) {
        if !self.released {
            unregister(&self.path);
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Remove held markers on SIGINT/SIGTERM, then exit with status 130.
pub fn install_signal_release() -> Result<(), AppError> {
    ctrlc::set_handler(|| {
        release_all_held();
        std::process::exit(130);
    })
    .map_err(|e| AppError::config(format!("Failed to install signal handler: {e}")))
}

fn release_all_held() {
    let paths = match HELD.lock() {
        Ok(mut held) => std::mem::take(&mut *held),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    for path in paths {
        let _ = fs::remove_file(&path);
    }
}

fn register(path: &Path) {
    if let Ok(mut held) = HELD.lock() {
        held.push(path.to_path_buf());
    }
}

fn unregister(path: &Path) {
    if let Ok(mut held) = HELD.lock() {
        held.retain(|p| p != path);
    }
}

fn describe_owner(path: &Path) -> String {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockOwner>(&bytes).ok())
        .map(|owner| owner.to_string())
        .unwrap_or_else(|| "owner unknown".to_string())
}

fn is_stale(path: &Path, stale_after: Option<Duration>, now: SystemTime) -> bool {
    let Some(threshold) = stale_after else {
        return false;
    };
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age > threshold)
}

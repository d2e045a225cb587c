//! Processing watermark.
//!
//! The watermark is the highest identifier known to be fully processed. It is a
//! single text value on disk, rewritten atomically, and only moved forward after
//! the artifact for that identifier has been durably written.

use std::cmp::Ordering;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::IdOrder;
use crate::error::AppError;

const WATERMARK_FILE: &str = "watermark";

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to read watermark '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to persist watermark '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<WatermarkError> for AppError {
    fn from(err: WatermarkError) -> Self {
        AppError::io(err.to_string())
    }
}

/// A total order over record identifiers.
pub trait IdentifierOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

impl IdentifierOrder for IdOrder {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            IdOrder::Lexical => a.cmp(b),
            // Every numeric identifier sorts before every non-numeric one.
            IdOrder::Numeric => match (a.trim().parse::<i128>(), b.trim().parse::<i128>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => a.cmp(b),
            },
        }
    }
}

impl<F> IdentifierOrder for F
where
    F: Fn(&str, &str) -> Ordering,
{
    fn compare(&self, a: &str, b: &str) -> Ordering {
        self(a, b)
    }
}

/// Whether `id` is newer than `watermark` (everything is newer than no watermark).
pub fn accepts(id: &str, watermark: Option<&str>, order: &impl IdentifierOrder) -> bool {
    match watermark {
        None => true,
        Some(mark) => order.compare(id, mark) == Ordering::Greater,
    }
}

/// On-disk watermark location.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(WATERMARK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored watermark. A missing or blank file means "nothing processed yet".
    pub fn load(&self) -> Result<Option<String>, WatermarkError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let value = contents.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(WatermarkError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Remove the stored watermark.
    pub fn clear(&self) -> Result<(), WatermarkError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WatermarkError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Atomically replace the stored watermark with `id`.
    pub fn persist(&self, id: &str) -> Result<(), WatermarkError> {
        let write_err = |source: std::io::Error| WatermarkError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(write_err)?;
            file.write_all(id.as_bytes()).map_err(write_err)?;
            file.write_all(b"\n").map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(write_err)?;
        Ok(())
    }
}

/// Per-cycle view of the watermark.
///
/// Once a record fails, the cursor refuses to advance to that identifier or
/// anything ordered after it for the rest of the cycle, so the failed record is
/// offered again next time. A mark already persisted at or past a failed
/// identifier (out-of-order sources, duplicate identifiers) is rolled back.
#[derive(Debug)]
pub struct WatermarkCursor<O> {
    store: WatermarkStore,
    order: O,
    loaded: Option<String>,
    current: Option<String>,
    advanced: Vec<String>,
    failure_floor: Option<String>,
}

impl<O: IdentifierOrder> WatermarkCursor<O> {
    pub fn load(store: WatermarkStore, order: O) -> Result<Self, WatermarkError> {
        let current = store.load()?;
        debug!(watermark = ?current, path = %store.path().display(), "watermark loaded");
        Ok(Self {
            store,
            order,
            loaded: current.clone(),
            current,
            advanced: Vec::new(),
            failure_floor: None,
        })
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn accepts(&self, id: &str) -> bool {
        accepts(id, self.current(), &self.order)
    }

    /// Note that `id` failed this cycle, pulling the persisted mark back below it
    /// if this cycle already advanced that far.
    pub fn record_failure(&mut self, id: &str) -> Result<(), WatermarkError> {
        let lower = match &self.failure_floor {
            Some(floor) => self.order.compare(id, floor) == Ordering::Less,
            None => true,
        };
        if lower {
            self.failure_floor = Some(id.to_string());
        }

        let Some(current) = self.current.as_deref() else {
            return Ok(());
        };
        if self.order.compare(current, id) == Ordering::Less || self.current == self.loaded {
            return Ok(());
        }

        // Never below where the cycle started.
        let target = self
            .advanced
            .iter()
            .filter(|done| self.order.compare(done.as_str(), id) == Ordering::Less)
            .max_by(|a, b| self.order.compare(a.as_str(), b.as_str()))
            .cloned()
            .or_else(|| self.loaded.clone());
        match target.as_deref() {
            Some(mark) => self.store.persist(mark)?,
            None => self.store.clear()?,
        }
        warn!(
            failed_id = id,
            from = current,
            to = ?target,
            "watermark rolled back behind failed record"
        );
        self.current = target;
        Ok(())
    }

    /// Move the watermark to `id` after its artifact was durably written.
    ///
    /// Returns `Ok(false)` when the watermark stays put: `id` is not newer than
    /// the current mark, or an earlier-ordered record failed this cycle.
    pub fn advance(&mut self, id: &str) -> Result<bool, WatermarkError> {
        if let Some(floor) = &self.failure_floor {
            if self.order.compare(id, floor) != Ordering::Less {
                warn!(record_id = id, failed_id = %floor, "watermark held behind failed record");
                return Ok(false);
            }
        }
        if !self.accepts(id) {
            return Ok(false);
        }

        self.store.persist(id)?;
        debug!(record_id = id, "watermark advanced");
        self.current = Some(id.to_string());
        self.advanced.push(id.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn numeric_order_compares_as_integers() {
        assert_eq!(IdOrder::Numeric.compare("9", "10"), Ordering::Less);
        assert_eq!(IdOrder::Lexical.compare("9", "10"), Ordering::Greater);
        assert_eq!(IdOrder::Numeric.compare("007", "7"), Ordering::Equal);
    }

    #[test]
    fn numeric_order_is_transitive_over_mixed_identifiers() {
        let order = IdOrder::Numeric;
        let ids = ["2", "10", "1a", "abc", "-3", "007"];
        for a in ids {
            for b in ids {
                assert_eq!(order.compare(a, b), order.compare(b, a).reverse());
                for c in ids {
                    let ab = order.compare(a, b);
                    if ab == Ordering::Less && order.compare(b, c) == Ordering::Less {
                        assert_eq!(order.compare(a, c), Ordering::Less, "{a} < {b} < {c}");
                    }
                }
            }
        }
        assert_eq!(IdOrder::Numeric.compare("10", "1a"), Ordering::Less);
        assert_eq!(IdOrder::Numeric.compare("2", "1a"), Ordering::Less);
    }

    #[test]
    fn closures_can_supply_the_order() {
        let reversed = |a: &str, b: &str| b.cmp(a);
        assert!(accepts("a", Some("b"), &reversed));
        assert!(!accepts("c", Some("b"), &reversed));
    }

    #[test]
    fn missing_file_loads_as_empty_and_persist_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(&dir.path().join("state"));
        assert_eq!(store.load().expect("load"), None);

        store.persist("42").expect("persist");
        assert_eq!(store.load().expect("load"), Some("42".to_string()));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn failed_record_is_offered_again_next_cycle() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(dir.path());
        store.persist("10").expect("seed");

        let mut cursor = WatermarkCursor::load(store.clone(), IdOrder::Numeric).expect("load");
        assert!(!cursor.accepts("10"));
        assert!(cursor.accepts("11"));

        // 11 fails; 12 succeeds but must not move the mark past 11.
        cursor.record_failure("11").expect("failure");
        assert!(!cursor.advance("12").expect("advance"));
        assert_eq!(store.load().expect("load"), Some("10".to_string()));

        let next = WatermarkCursor::load(store, IdOrder::Numeric).expect("reload");
        assert!(next.accepts("11"));
    }

    #[test]
    fn failure_below_an_advanced_mark_rolls_it_back() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(dir.path());
        store.persist("10").expect("seed");

        // Source order 13, 12, 11: 13 and 12 succeed, then 11 fails.
        let mut cursor = WatermarkCursor::load(store.clone(), IdOrder::Numeric).expect("load");
        assert!(cursor.advance("13").expect("advance"));
        cursor.record_failure("11").expect("failure");
        assert!(!cursor.advance("12").expect("advance"));
        assert_eq!(cursor.current(), Some("10"));
        assert_eq!(store.load().expect("load"), Some("10".to_string()));

        let next = WatermarkCursor::load(store, IdOrder::Numeric).expect("reload");
        assert!(next.accepts("11"));
    }

    #[test]
    fn rollback_keeps_successes_below_the_failure() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(dir.path());

        let mut cursor = WatermarkCursor::load(store.clone(), IdOrder::Numeric).expect("load");
        assert!(cursor.advance("3").expect("advance"));
        assert!(cursor.advance("9").expect("advance"));
        cursor.record_failure("7").expect("failure");
        assert_eq!(store.load().expect("load"), Some("3".to_string()));

        // Duplicate identifier: the first copy succeeded, the second failed.
        cursor.record_failure("3").expect("failure");
        assert_eq!(cursor.current(), None);
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn advance_never_moves_backwards() {
        let dir = tempdir().expect("tempdir");
        let store = WatermarkStore::new(dir.path());
        let mut cursor = WatermarkCursor::load(store.clone(), IdOrder::Numeric).expect("load");

        assert!(cursor.advance("5").expect("advance"));
        assert!(!cursor.advance("3").expect("advance"));
        assert_eq!(cursor.current(), Some("5"));
        assert_eq!(store.load().expect("load"), Some("5".to_string()));
    }
}

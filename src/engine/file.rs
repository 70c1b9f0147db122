//! File-backed storage engine (persistent)
//!
//! The whole table lives in memory and is mirrored to a JSON snapshot
//! on every mutation. The snapshot is written to a sibling temp file
//! and renamed into place so a crash mid-write never leaves a torn
//! snapshot behind.

use super::memory::Table;
use super::{EngineError, EngineKind, StorageEngine};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::error;

pub struct FileEngine {
    path: PathBuf,
    quota: Option<usize>,
    table: Mutex<Table>,
}

impl FileEngine {
    /// Open the snapshot at `path`, creating an empty table when the
    /// file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let mut table = Table::default();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let snapshot: BTreeMap<String, String> = serde_json::from_str(&text)
                    .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
                for (key, value) in snapshot {
                    table.insert(&key, &value);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EngineError::Io(e)),
        }
        Ok(FileEngine {
            path,
            quota: None,
            table: Mutex::new(table),
        })
    }

    pub fn open_with_quota(path: impl Into<PathBuf>, quota: usize) -> Result<Self, EngineError> {
        let mut engine = Self::open(path)?;
        engine.quota = Some(quota);
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &Table) -> Result<(), EngineError> {
        let snapshot: BTreeMap<&String, &String> =
            table.keys().filter_map(|k| Some((k, table.value_of(k)?))).collect();
        let text = serde_json::to_string(&snapshot)
            .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageEngine for FileEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Persistent
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.table.lock().get(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let mut table = self.table.lock();
        let used = table.usage_with(key, value);
        if let Some(quota) = self.quota {
            if used > quota {
                return Err(EngineError::QuotaExceeded { used, quota });
            }
        }
        let previous = table.get(key);
        table.insert(key, value);
        if let Err(e) = self.persist(&table) {
            // roll back so memory and disk stay in agreement
            match previous {
                Some(old) => table.insert(key, &old),
                None => {
                    table.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        let mut table = self.table.lock();
        if table.remove(key).is_some() {
            if let Err(e) = self.persist(&table) {
                error!(path = %self.path.display(), %e, "snapshot write failed after removal");
            }
        }
    }

    fn key_at(&self, index: usize) -> Option<String> {
        self.table.lock().key_at(index)
    }

    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

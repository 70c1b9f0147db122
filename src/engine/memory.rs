//! In-memory storage engine (session-scoped)

use super::{EngineError, EngineKind, StorageEngine};
use ahash::AHashMap;
use parking_lot::Mutex;

/// Insertion-ordered key table shared by the in-memory engines.
#[derive(Default)]
pub(crate) struct Table {
    map: AHashMap<String, String>,
    order: Vec<String>,
    used: usize,
}

impl Table {
    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    /// Byte usage after the write, or the unchanged usage for a fresh key.
    pub(crate) fn usage_with(&self, key: &str, value: &str) -> usize {
        match self.map.get(key) {
            Some(old) => self.used - old.len() + value.len(),
            None => self.used + key.len() + value.len(),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, value: &str) {
        self.used = self.usage_with(key, value);
        if self.map.insert(key.to_string(), value.to_string()).is_none() {
            self.order.push(key.to_string());
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<String> {
        let old = self.map.remove(key)?;
        self.used -= key.len() + old.len();
        self.order.retain(|k| k != key);
        Some(old)
    }

    pub(crate) fn key_at(&self, index: usize) -> Option<String> {
        self.order.get(index).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub(crate) fn value_of(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }
}

/// Volatile engine backed by a mutex-guarded table. Defaults to the
/// session scope; `persistent()` builds one reporting the persistent
/// scope for contexts that want both engines in memory (tests, tools
/// running without a data directory).
pub struct MemoryEngine {
    kind: EngineKind,
    quota: Option<usize>,
    disabled: bool,
    table: Mutex<Table>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine {
            kind: EngineKind::Session,
            quota: None,
            disabled: false,
            table: Mutex::new(Table::default()),
        }
    }

    pub fn persistent() -> Self {
        MemoryEngine {
            kind: EngineKind::Persistent,
            ..Self::new()
        }
    }

    /// Cap total stored bytes (keys + values).
    pub fn with_quota(quota: usize) -> Self {
        MemoryEngine {
            quota: Some(quota),
            ..Self::new()
        }
    }

    /// An engine that refuses every write, for exercising degraded
    /// environments.
    pub fn disabled() -> Self {
        MemoryEngine {
            disabled: true,
            ..Self::new()
        }
    }
}

impl StorageEngine for MemoryEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.table.lock().get(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if self.disabled {
            return Err(EngineError::Disabled);
        }
        let mut table = self.table.lock();
        let used = table.usage_with(key, value);
        if let Some(quota) = self.quota {
            if used > quota {
                return Err(EngineError::QuotaExceeded { used, quota });
            }
        }
        table.insert(key, value);
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.table.lock().remove(key);
    }

    fn key_at(&self, index: usize) -> Option<String> {
        self.table.lock().key_at(index)
    }

    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

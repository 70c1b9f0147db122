//! Storage engine abstraction
//!
//! Engines are synchronous string-to-string tables with indexable key
//! enumeration and an optional byte quota. Two shapes ship here:
//!
//! - `MemoryEngine`: session-scoped, gone when the process exits
//! - `FileEngine`: persistent, mirrored to a JSON snapshot file
//!
//! Handles carry a process-unique identity so higher layers can key
//! shared state by engine without comparing trait objects.

mod file;
mod memory;
mod probe;

pub use file::FileEngine;
pub use memory::MemoryEngine;
pub use probe::SupportReport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Which scope an engine belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Survives process restarts (file-backed).
    Persistent,
    /// Lives only as long as the process.
    Session,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Persistent => write!(f, "persistent"),
            EngineKind::Session => write!(f, "session"),
        }
    }
}

/// Error type for engine mutations.
#[derive(Debug)]
pub enum EngineError {
    /// The write would push stored bytes past the configured quota.
    QuotaExceeded { used: usize, quota: usize },
    /// The engine refuses all writes (disabled storage).
    Disabled,
    /// I/O error from a persistent backend.
    Io(std::io::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::QuotaExceeded { used, quota } => {
                write!(f, "storage quota exceeded: {} of {} bytes used", used, quota)
            }
            EngineError::Disabled => write!(f, "storage engine is disabled"),
            EngineError::Io(e) => write!(f, "storage I/O error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

/// Synchronous storage engine contract.
///
/// `key_at`/`len` exist for enumeration: indices are only stable while
/// no mutation happens in between, same as the storage they model.
pub trait StorageEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), EngineError>;
    fn remove_item(&self, key: &str);
    fn key_at(&self, index: usize) -> Option<String>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-unique engine identity, used to key per-engine shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a storage engine. Clones share both the engine and
/// its identity.
#[derive(Clone)]
pub struct EngineHandle {
    id: EngineId,
    inner: Arc<dyn StorageEngine>,
}

impl EngineHandle {
    pub fn new(engine: impl StorageEngine + 'static) -> Self {
        EngineHandle {
            id: EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed)),
            inner: Arc::new(engine),
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }
}

impl std::ops::Deref for EngineHandle {
    type Target = dyn StorageEngine;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl PartialEq for EngineHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EngineHandle {}

impl std::hash::Hash for EngineHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("kind", &self.inner.kind())
            .finish()
    }
}

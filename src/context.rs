//! Persistence context
//!
//! Owns everything stores share: the two engines, the change bus, the
//! listener hub and the batch registry, plus the capability report
//! probed once at construction. An explicit object rather than module
//! globals so each test (or embedder) gets an isolated world that is
//! torn down when the last clone drops.

use crate::engine::{EngineHandle, FileEngine, MemoryEngine, SupportReport};
use crate::events::{ChangeBus, ListenerHub};
use crate::store::BatchRegistry;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct PersistContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    persistent: EngineHandle,
    session: EngineHandle,
    bus: Arc<ChangeBus>,
    hub: ListenerHub,
    registry: BatchRegistry,
    support: SupportReport,
}

impl PersistContext {
    /// Context over the given engines with a private change bus.
    pub fn new(persistent: EngineHandle, session: EngineHandle) -> Self {
        Self::with_bus(persistent, session, Arc::new(ChangeBus::new()))
    }

    /// Context over the given engines, subscribed to an externally
    /// shared change bus.
    pub fn with_bus(
        persistent: EngineHandle,
        session: EngineHandle,
        bus: Arc<ChangeBus>,
    ) -> Self {
        let support = SupportReport::probe(&persistent);
        PersistContext {
            inner: Arc::new(ContextInner {
                persistent,
                session,
                bus,
                hub: ListenerHub::new(),
                registry: BatchRegistry::new(),
                support,
            }),
        }
    }

    /// Both engines in memory. The go-to context for tests and for
    /// running without a data directory.
    pub fn in_memory() -> Self {
        Self::new(
            EngineHandle::new(MemoryEngine::persistent()),
            EngineHandle::new(MemoryEngine::new()),
        )
    }

    /// File-backed persistent engine under `dir`, in-memory session
    /// engine.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, crate::engine::EngineError> {
        let persistent = FileEngine::open(dir.as_ref().join("persist.json"))?;
        Ok(Self::new(
            EngineHandle::new(persistent),
            EngineHandle::new(MemoryEngine::new()),
        ))
    }

    pub fn persistent(&self) -> &EngineHandle {
        &self.inner.persistent
    }

    pub fn session(&self) -> &EngineHandle {
        &self.inner.session
    }

    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.inner.bus
    }

    pub fn hub(&self) -> &ListenerHub {
        &self.inner.hub
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.inner.registry
    }

    pub fn support(&self) -> SupportReport {
        self.inner.support
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_context_probes_healthy() {
        let ctx = PersistContext::in_memory();
        assert!(ctx.support().can);
        assert!(!ctx.support().exceeded);
    }

    #[test]
    fn test_open_reuses_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ctx = PersistContext::open(dir.path()).unwrap();
            ctx.persistent().set_item("k", "v").unwrap();
        }
        let ctx = PersistContext::open(dir.path()).unwrap();
        assert_eq!(ctx.persistent().get_item("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_contexts_are_isolated() {
        let a = PersistContext::in_memory();
        let b = PersistContext::in_memory();
        a.persistent().set_item("k", "v").unwrap();
        assert_eq!(b.persistent().get_item("k"), None);
        assert_ne!(a.persistent().id(), b.persistent().id());
    }
}

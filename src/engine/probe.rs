//! Storage capability probe
//!
//! Answers, once per context, whether an engine is usable at all. The
//! distinction between "full" and "broken" matters: a full engine can
//! still serve reads and removals, a broken one cannot be trusted with
//! anything.

use super::{EngineError, EngineHandle};

const SENTINEL_KEY: &str = "__persist_kv_support__";

/// Result of probing an engine with a sentinel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportReport {
    /// An engine is present.
    pub has: bool,
    /// Writes are expected to work (possibly failing on quota).
    pub can: bool,
    /// The engine already holds data and rejected the sentinel write
    /// on quota grounds.
    pub exceeded: bool,
}

impl SupportReport {
    pub fn probe(engine: &EngineHandle) -> Self {
        match engine.set_item(SENTINEL_KEY, "1") {
            Ok(()) => {
                engine.remove_item(SENTINEL_KEY);
                SupportReport {
                    has: true,
                    can: true,
                    exceeded: false,
                }
            }
            Err(EngineError::QuotaExceeded { .. }) if engine.len() > 0 => SupportReport {
                has: true,
                can: true,
                exceeded: true,
            },
            Err(_) => SupportReport {
                has: true,
                can: false,
                exceeded: false,
            },
        }
    }

    /// Report for an environment with no engine at all.
    pub fn unsupported() -> Self {
        SupportReport {
            has: false,
            can: false,
            exceeded: false,
        }
    }
}

//! Error type for store operations

use crate::engine::EngineError;

/// Error type for persistence operations.
///
/// Only `clear_items` surfaces errors by default; writes swallow them
/// (logged) unless the caller opts into the `try_` variants.
#[derive(Debug)]
pub enum PersistError {
    /// Value could not be JSON-encoded or decoded.
    Serialization(serde_json::Error),
    /// The engine rejected the operation (quota, disabled, I/O).
    Engine(EngineError),
    /// The operation is unsafe with the current configuration.
    Configuration(String),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Serialization(e) => write!(f, "serialization failed: {}", e),
            PersistError::Engine(e) => write!(f, "storage engine error: {}", e),
            PersistError::Configuration(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::Serialization(e) => Some(e),
            PersistError::Engine(e) => Some(e),
            PersistError::Configuration(_) => None,
        }
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(e: serde_json::Error) -> Self {
        PersistError::Serialization(e)
    }
}

impl From<EngineError> for PersistError {
    fn from(e: EngineError) -> Self {
        PersistError::Engine(e)
    }
}

//! Store configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a store instance. Immutable once a store is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Namespace prefix (joined to keys with `separator` when set).
    pub prefix: String,
    /// Namespace suffix (joined to keys with `separator` when set).
    pub suffix: String,
    /// Joiner between prefix/suffix and the logical key.
    pub separator: String,
    /// Shift secret handed to the codec in obfuscated mode.
    pub secret: u32,
    /// Debounce window for the batched store (default: 500ms).
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            prefix: String::new(),
            suffix: String::new(),
            separator: String::new(),
            secret: 42,
            delay: Duration::from_millis(500),
        }
    }
}

impl StoreConfig {
    /// Namespaced configuration with everything else at defaults.
    pub fn scoped(prefix: &str, suffix: &str, separator: &str) -> Self {
        StoreConfig {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            separator: separator.to_string(),
            ..Default::default()
        }
    }

    /// Configuration for testing (short debounce window).
    pub fn test() -> Self {
        StoreConfig {
            delay: Duration::from_millis(50),
            ..Default::default()
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

//! Key namespace derivation
//!
//! `prefix`/`suffix`/`separator` are combined once, at construction:
//! from then on `full_key(k) = prefix + k + suffix` is a pure,
//! invertible string transform. The namespace group — prefix+suffix
//! with no key in between — identifies instances that share a keyspace.

/// Normalized prefix/suffix pair for one store instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    suffix: String,
}

impl KeySpace {
    pub fn new(prefix: &str, suffix: &str, separator: &str) -> Self {
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}{}", prefix, separator)
        };
        let suffix = if suffix.is_empty() {
            String::new()
        } else {
            format!("{}{}", separator, suffix)
        };
        KeySpace { prefix, suffix }
    }

    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, key, self.suffix)
    }

    /// Inverse of `full_key`. A string that does not carry this
    /// namespace is returned unchanged.
    pub fn un_full_key(&self, full_key: &str) -> String {
        let stripped = full_key.strip_prefix(&self.prefix).unwrap_or(full_key);
        let stripped = stripped.strip_suffix(&self.suffix).unwrap_or(stripped);
        stripped.to_string()
    }

    /// True when `full_key` belongs to this namespace.
    pub fn matches(&self, full_key: &str) -> bool {
        full_key.starts_with(&self.prefix) && full_key.ends_with(&self.suffix)
    }

    /// Identifier shared by every instance with the same prefix/suffix.
    pub fn group(&self) -> String {
        format!("{}{}", self.prefix, self.suffix)
    }

    /// Whether a namespace is configured at all. Unscoped key spaces
    /// cannot support clearing or enumeration.
    pub fn is_scoped(&self) -> bool {
        !(self.prefix.is_empty() && self.suffix.is_empty())
    }
}

/// Split a comma-separated key list, dropping whitespace and empties.
pub(crate) fn split_keys(keys: &str) -> Vec<&str> {
    keys.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect()
}

//! Batched persistence tool
//!
//! Same contract as `PersistStore`, different write path: logical
//! writes land in the shared group cache immediately and reach the
//! engine in one coalesced pass after the debounce window closes.
//! Reads are always fresh — the cache answers before the engine does —
//! so the only staleness anywhere is the physical store lagging by at
//! most one delay window. Removal is the exception: tombstones don't
//! queue, they hit the engine synchronously.

use super::config::StoreConfig;
use super::error::PersistError;
use super::registry::{GroupKey, PendingWrite};
use super::tool::{OpOptions, Persist, PersistStore};
use crate::context::PersistContext;
use crate::events::{ChangeEvent, ListenerToken, NativeChangeEvent};
use serde_json::Value;
use std::time::Duration;

/// Write-coalescing store. Composes the direct store for every
/// physical operation rather than shadowing it.
pub struct BatchPersistStore {
    base: PersistStore,
    group: String,
    delay: Duration,
}

impl BatchPersistStore {
    pub fn new(ctx: &PersistContext, config: StoreConfig) -> Self {
        PersistStore::builder(ctx).config(config).build_batch()
    }

    pub fn noop(ctx: &PersistContext) -> Self {
        Self::from_store(PersistStore::noop(ctx))
    }

    pub(crate) fn from_store(base: PersistStore) -> Self {
        let group = base.keyspace().group();
        let delay = base.config().delay;
        BatchPersistStore { base, group, delay }
    }

    /// The underlying direct store.
    pub fn base(&self) -> &PersistStore {
        &self.base
    }

    pub fn is_noop(&self) -> bool {
        self.base.is_noop()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn full_key(&self, key: &str) -> String {
        self.base.full_key(key)
    }

    pub fn un_full_key(&self, full_key: &str) -> String {
        self.base.un_full_key(full_key)
    }

    /// View applying the codec on every read and write. The cache
    /// always holds the plain value; the codec only shapes what the
    /// engine stores.
    pub fn obfuscation(&self) -> BatchObfuscatedView<'_> {
        BatchObfuscatedView { store: self }
    }

    // Listener surface passes straight through to the base store.

    pub fn on(
        &self,
        keys: &str,
        handler: impl Fn(&ChangeEvent, &NativeChangeEvent) + Send + Sync + 'static,
    ) -> Option<ListenerToken> {
        self.base.on(keys, handler)
    }

    pub fn off(&self) {
        self.base.off();
    }

    pub fn off_keys(&self, keys: &str) {
        self.base.off_keys(keys);
    }

    pub fn off_handler(&self, keys: &str, token: ListenerToken) {
        self.base.off_handler(keys, token);
    }

    fn group_key(&self, opts: &OpOptions) -> GroupKey {
        (self.base.resolve_engine(opts).id(), self.group.clone())
    }

    fn set_batch(
        &self,
        key: &str,
        value: Value,
        opts: &OpOptions,
        obfuscate: bool,
    ) -> Option<String> {
        if self.is_noop() {
            return None;
        }
        if value.is_null() {
            self.remove_item_with(key, opts);
            return None;
        }
        let engine = self.base.resolve_engine(opts);
        let full_key = self.base.full_key(key);
        let write = PendingWrite {
            value: value.clone(),
            engine: engine.clone(),
            full_key: full_key.clone(),
            obfuscate,
            secret: self.base.config().secret,
            codec: self.base.codec_arc(),
        };
        self.base.context().registry().set_item(
            (engine.id(), self.group.clone()),
            key,
            value,
            write,
            self.delay,
        );
        Some(full_key)
    }

    fn get_batch(
        &self,
        key: &str,
        fallback: Value,
        opts: &OpOptions,
        deobfuscate: bool,
    ) -> Value {
        if self.is_noop() {
            return fallback;
        }
        let group = self.group_key(opts);
        if let Some(cached) = self.base.context().registry().get(&group, key) {
            return cached;
        }
        let value = self
            .base
            .get_item_inner(key, fallback.clone(), opts, deobfuscate);
        if value != fallback {
            self.base
                .context()
                .registry()
                .cache_fill(group, key, value.clone());
        }
        value
    }
}

impl Persist for BatchPersistStore {
    fn set_item_with(&self, key: &str, value: Value, opts: &OpOptions) -> Option<String> {
        self.set_batch(key, value, opts, false)
    }

    fn get_item_with(&self, key: &str, fallback: Value, opts: &OpOptions) -> Value {
        self.get_batch(key, fallback, opts, false)
    }

    /// Removal is synchronous: the queued write (if any) is discarded,
    /// never flushed-then-deleted, and the engine is updated now.
    fn remove_item_with(&self, key: &str, opts: &OpOptions) {
        if self.is_noop() {
            return;
        }
        let group = self.group_key(opts);
        self.base.context().registry().remove(&group, key);
        self.base.remove_item_with(key, opts);
    }

    fn clear_items_with(&self, opts: &OpOptions) -> Result<(), PersistError> {
        if self.is_noop() {
            return Ok(());
        }
        self.base.clear_items_with(opts)?;
        let group = self.group_key(opts);
        self.base.context().registry().discard_group(&group);
        Ok(())
    }

    /// Cache-authoritative: enumerates the group's cached keys, not
    /// the engine, so not-yet-flushed writes are included.
    fn get_keys_with(&self, opts: &OpOptions) -> Vec<String> {
        if self.is_noop() {
            return Vec::new();
        }
        let group = self.group_key(opts);
        self.base
            .context()
            .registry()
            .item_keys(&group)
            .into_iter()
            .map(|key| self.base.full_key(&key))
            .collect()
    }
}

/// Codec-on view over a batched store.
pub struct BatchObfuscatedView<'a> {
    store: &'a BatchPersistStore,
}

impl BatchObfuscatedView<'_> {
    pub fn set_item(&self, key: &str, value: Value) -> Option<String> {
        self.set_item_with(key, value, &OpOptions::default())
    }

    pub fn set_item_with(&self, key: &str, value: Value, opts: &OpOptions) -> Option<String> {
        self.store.set_batch(key, value, opts, true)
    }

    pub fn get_item(&self, key: &str) -> Value {
        self.get_item_with(key, Value::Null, &OpOptions::default())
    }

    pub fn get_item_or(&self, key: &str, fallback: Value) -> Value {
        self.get_item_with(key, fallback, &OpOptions::default())
    }

    pub fn get_item_with(&self, key: &str, fallback: Value, opts: &OpOptions) -> Value {
        self.store.get_batch(key, fallback, opts, true)
    }

    pub fn remove_item(&self, key: &str) {
        self.store.remove_item(key);
    }
}

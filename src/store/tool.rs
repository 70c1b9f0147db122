//! Core persistence tool
//!
//! `PersistStore` is the direct-engine implementation of the `Persist`
//! seam: synchronous reads and writes against one storage engine,
//! values round-tripped through JSON, codec applied only through the
//! `obfuscation()` view, and the listener surface for cross-context
//! change events.
//!
//! Write failures are silent by design at this layer: a full or broken
//! engine must not take the caller down. `set_item` logs and returns
//! `None`; callers that need the cause use `try_set_item`.

use super::config::StoreConfig;
use super::error::PersistError;
use super::keys::{split_keys, KeySpace};
use crate::codec::{Codec, ShiftCodec};
use crate::context::PersistContext;
use crate::engine::EngineHandle;
use crate::events::{ChangeEvent, ChangeHandler, ListenerToken, NativeChangeEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

/// Per-call options. `engine` overrides the instance default for this
/// call only; `raw` skips JSON parsing on reads.
#[derive(Clone, Default)]
pub struct OpOptions {
    pub engine: Option<EngineHandle>,
    pub raw: bool,
}

impl OpOptions {
    pub fn raw() -> Self {
        OpOptions {
            raw: true,
            ..Default::default()
        }
    }

    pub fn on_engine(engine: EngineHandle) -> Self {
        OpOptions {
            engine: Some(engine),
            ..Default::default()
        }
    }
}

/// The persistence seam: one contract, two implementations — the
/// direct-engine `PersistStore` and the cached `BatchPersistStore`.
pub trait Persist {
    fn set_item_with(&self, key: &str, value: Value, opts: &OpOptions) -> Option<String>;
    fn get_item_with(&self, key: &str, fallback: Value, opts: &OpOptions) -> Value;
    fn remove_item_with(&self, key: &str, opts: &OpOptions);
    fn clear_items_with(&self, opts: &OpOptions) -> Result<(), PersistError>;
    fn get_keys_with(&self, opts: &OpOptions) -> Vec<String>;

    /// Store a value under `key`. `Value::Null` removes the key.
    /// Returns the full storage key, or `None` in no-op mode or when
    /// the write failed (failures are logged, not raised).
    fn set_item(&self, key: &str, value: Value) -> Option<String> {
        self.set_item_with(key, value, &OpOptions::default())
    }

    fn get_item(&self, key: &str) -> Value {
        self.get_item_with(key, Value::Null, &OpOptions::default())
    }

    fn get_item_or(&self, key: &str, fallback: Value) -> Value {
        self.get_item_with(key, fallback, &OpOptions::default())
    }

    fn remove_item(&self, key: &str) {
        self.remove_item_with(key, &OpOptions::default());
    }

    /// Remove every key in this instance's namespace. Refuses to run
    /// unscoped: without a prefix or suffix there is no way to tell
    /// this instance's keys from anything else in the engine.
    fn clear_items(&self) -> Result<(), PersistError> {
        self.clear_items_with(&OpOptions::default())
    }

    /// Full keys of this instance's namespace. Empty when unscoped.
    fn get_keys(&self) -> Vec<String> {
        self.get_keys_with(&OpOptions::default())
    }
}

/// Direct-engine store.
pub struct PersistStore {
    ctx: PersistContext,
    config: StoreConfig,
    keys: KeySpace,
    engine: EngineHandle,
    codec: Arc<dyn Codec>,
    noop: bool,
}

impl PersistStore {
    pub fn new(ctx: &PersistContext, config: StoreConfig) -> Self {
        Self::builder(ctx).config(config).build()
    }

    pub fn builder(ctx: &PersistContext) -> StoreBuilder<'_> {
        StoreBuilder::new(ctx)
    }

    /// A store whose every operation is a harmless no-op. Reads return
    /// the caller's fallback, writes return `None`.
    pub fn noop(ctx: &PersistContext) -> Self {
        Self::builder(ctx).noop().build()
    }

    pub fn is_noop(&self) -> bool {
        self.noop
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn support(&self) -> crate::engine::SupportReport {
        self.ctx.support()
    }

    pub fn full_key(&self, key: &str) -> String {
        self.keys.full_key(key)
    }

    pub fn un_full_key(&self, full_key: &str) -> String {
        self.keys.un_full_key(full_key)
    }

    /// View applying the codec on every read and write.
    pub fn obfuscation(&self) -> ObfuscatedView<'_> {
        ObfuscatedView { store: self }
    }

    /// Typed variant of `set_item`: surfaces the serialization or
    /// engine error instead of swallowing it. `Ok(None)` means the
    /// call was a no-op (no-op mode, or a null value routed to
    /// removal).
    pub fn try_set_item(&self, key: &str, value: Value) -> Result<Option<String>, PersistError> {
        self.try_set_item_with(key, value, &OpOptions::default(), false)
    }

    pub(crate) fn try_set_item_with(
        &self,
        key: &str,
        value: Value,
        opts: &OpOptions,
        obfuscate: bool,
    ) -> Result<Option<String>, PersistError> {
        if self.noop {
            return Ok(None);
        }
        if value.is_null() {
            self.remove_item_with(key, opts);
            return Ok(None);
        }
        let full_key = self.keys.full_key(key);
        let engine = self.resolve_engine(opts);
        write_physical(&engine, &full_key, &value, self.codec_for(obfuscate))?;
        Ok(Some(full_key))
    }

    pub(crate) fn set_item_logged(
        &self,
        key: &str,
        value: Value,
        opts: &OpOptions,
        obfuscate: bool,
    ) -> Option<String> {
        match self.try_set_item_with(key, value, opts, obfuscate) {
            Ok(full_key) => full_key,
            Err(e) => {
                error!(key, %e, "write failed");
                None
            }
        }
    }

    pub(crate) fn get_item_inner(
        &self,
        key: &str,
        fallback: Value,
        opts: &OpOptions,
        deobfuscate: bool,
    ) -> Value {
        if self.noop {
            return fallback;
        }
        let full_key = self.keys.full_key(key);
        let engine = self.resolve_engine(opts);
        read_physical(
            &engine,
            &full_key,
            fallback,
            opts.raw,
            self.codec_for(deobfuscate),
        )
    }

    pub(crate) fn resolve_engine(&self, opts: &OpOptions) -> EngineHandle {
        opts.engine.clone().unwrap_or_else(|| self.engine.clone())
    }

    pub(crate) fn codec_for(&self, obfuscate: bool) -> Option<CodecRef<'_>> {
        obfuscate.then_some(CodecRef {
            codec: &*self.codec,
            secret: self.config.secret,
        })
    }

    pub(crate) fn keyspace(&self) -> &KeySpace {
        &self.keys
    }

    pub(crate) fn codec_arc(&self) -> Arc<dyn Codec> {
        self.codec.clone()
    }

    pub(crate) fn context(&self) -> &PersistContext {
        &self.ctx
    }

    // ------------------------------------------------------------------
    // Change listeners
    // ------------------------------------------------------------------

    /// Listen for cross-context changes to one or more logical keys
    /// (comma-separated). The handler receives the normalized event
    /// and the native one. Returns `None` in no-op mode.
    pub fn on(
        &self,
        keys: &str,
        handler: impl Fn(&ChangeEvent, &NativeChangeEvent) + Send + Sync + 'static,
    ) -> Option<ListenerToken> {
        if self.noop {
            return None;
        }
        let full_keys: Vec<String> = split_keys(keys)
            .into_iter()
            .map(|k| self.keys.full_key(k))
            .collect();
        if full_keys.is_empty() {
            return None;
        }
        let handler: Arc<ChangeHandler> = Arc::new(handler);
        Some(
            self.ctx
                .hub()
                .register(self.ctx.bus(), &full_keys, self.keys.clone(), handler),
        )
    }

    /// Remove every handler for every key currently present in this
    /// instance's namespace.
    pub fn off(&self) {
        if self.noop {
            return;
        }
        for full_key in self.get_keys() {
            self.ctx.hub().remove_key(&full_key);
        }
    }

    /// Remove all handlers for the given logical keys.
    pub fn off_keys(&self, keys: &str) {
        if self.noop {
            return;
        }
        for key in split_keys(keys) {
            self.ctx.hub().remove_key(&self.keys.full_key(key));
        }
    }

    /// Remove one registration from the given logical keys.
    pub fn off_handler(&self, keys: &str, token: ListenerToken) {
        if self.noop {
            return;
        }
        let full_keys: Vec<String> = split_keys(keys)
            .into_iter()
            .map(|k| self.keys.full_key(k))
            .collect();
        self.ctx.hub().remove_token(&full_keys, token);
    }
}

impl Persist for PersistStore {
    fn set_item_with(&self, key: &str, value: Value, opts: &OpOptions) -> Option<String> {
        self.set_item_logged(key, value, opts, false)
    }

    fn get_item_with(&self, key: &str, fallback: Value, opts: &OpOptions) -> Value {
        self.get_item_inner(key, fallback, opts, false)
    }

    fn remove_item_with(&self, key: &str, opts: &OpOptions) {
        if self.noop {
            return;
        }
        let engine = self.resolve_engine(opts);
        engine.remove_item(&self.keys.full_key(key));
    }

    fn clear_items_with(&self, opts: &OpOptions) -> Result<(), PersistError> {
        if self.noop {
            return Ok(());
        }
        if !self.keys.is_scoped() {
            return Err(PersistError::Configuration(
                "clear_items can't run safely without a prefix or suffix".to_string(),
            ));
        }
        let engine = self.resolve_engine(opts);
        for full_key in self.get_keys_with(opts) {
            engine.remove_item(&full_key);
        }
        Ok(())
    }

    fn get_keys_with(&self, opts: &OpOptions) -> Vec<String> {
        if self.noop || !self.keys.is_scoped() {
            return Vec::new();
        }
        let engine = self.resolve_engine(opts);
        let mut full_keys = Vec::new();
        for index in 0..engine.len() {
            let Some(key) = engine.key_at(index) else { break };
            if self.keys.matches(&key) {
                full_keys.push(key);
            }
        }
        full_keys
    }
}

/// Codec + secret pair threaded through the physical read/write path.
#[derive(Clone, Copy)]
pub(crate) struct CodecRef<'a> {
    pub codec: &'a dyn Codec,
    pub secret: u32,
}

/// Serialize and write one value. Strings are stored raw; everything
/// else goes through JSON. The batched flush path calls this directly
/// so both implementations share one physical write.
pub(crate) fn write_physical(
    engine: &EngineHandle,
    full_key: &str,
    value: &Value,
    codec: Option<CodecRef<'_>>,
) -> Result<(), PersistError> {
    let mut text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)?,
    };
    if let Some(c) = codec {
        text = c.codec.obfuscate(&text, c.secret);
    }
    engine.set_item(full_key, &text)?;
    Ok(())
}

/// Read and decode one value. Unparsable stored text is handed back as
/// a plain string when it is anything other than the literal
/// `undefined`; a missing key or a null payload yields the fallback.
pub(crate) fn read_physical(
    engine: &EngineHandle,
    full_key: &str,
    fallback: Value,
    raw: bool,
    codec: Option<CodecRef<'_>>,
) -> Value {
    let Some(stored) = engine.get_item(full_key) else {
        return fallback;
    };
    let decoded = match codec {
        Some(c) => match c.codec.deobfuscate(&stored, c.secret) {
            Ok(text) => text,
            Err(_) => return recover(stored, fallback),
        },
        None => stored,
    };
    if raw {
        return Value::String(decoded);
    }
    match serde_json::from_str::<Value>(&decoded) {
        Ok(Value::Null) => fallback,
        Ok(value) => value,
        Err(_) => recover(decoded, fallback),
    }
}

fn recover(text: String, fallback: Value) -> Value {
    if text == "undefined" {
        fallback
    } else {
        Value::String(text)
    }
}

// ============================================================================
// ObfuscatedView - codec-on view over a store
// ============================================================================

/// `set_item`/`get_item` with the codec always applied; `remove_item`
/// passes through.
pub struct ObfuscatedView<'a> {
    store: &'a PersistStore,
}

impl ObfuscatedView<'_> {
    pub fn set_item(&self, key: &str, value: Value) -> Option<String> {
        self.set_item_with(key, value, &OpOptions::default())
    }

    pub fn set_item_with(&self, key: &str, value: Value, opts: &OpOptions) -> Option<String> {
        self.store.set_item_logged(key, value, opts, true)
    }

    pub fn get_item(&self, key: &str) -> Value {
        self.get_item_with(key, Value::Null, &OpOptions::default())
    }

    pub fn get_item_or(&self, key: &str, fallback: Value) -> Value {
        self.get_item_with(key, fallback, &OpOptions::default())
    }

    pub fn get_item_with(&self, key: &str, fallback: Value, opts: &OpOptions) -> Value {
        self.store.get_item_inner(key, fallback, opts, true)
    }

    pub fn remove_item(&self, key: &str) {
        self.store.remove_item(key);
    }
}

// ============================================================================
// StoreBuilder
// ============================================================================

/// Builder for `PersistStore` and `BatchPersistStore`.
pub struct StoreBuilder<'a> {
    ctx: &'a PersistContext,
    config: StoreConfig,
    engine: Option<EngineHandle>,
    codec: Option<Arc<dyn Codec>>,
    on_exceeded: Option<Box<dyn FnOnce()>>,
    noop: bool,
}

impl<'a> StoreBuilder<'a> {
    fn new(ctx: &'a PersistContext) -> Self {
        StoreBuilder {
            ctx,
            config: StoreConfig::default(),
            engine: None,
            codec: None,
            on_exceeded: None,
            noop: false,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Instance default engine (the context's persistent engine when
    /// unset).
    pub fn engine(mut self, engine: EngineHandle) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replace the default shift codec.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Invoked at build time when the capability probe reported the
    /// engine as already full.
    pub fn on_exceeded(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_exceeded = Some(Box::new(hook));
        self
    }

    pub fn noop(mut self) -> Self {
        self.noop = true;
        self
    }

    pub fn build(self) -> PersistStore {
        let support = self.ctx.support();
        if support.exceeded {
            if let Some(hook) = self.on_exceeded {
                hook();
            }
        }
        let keys = KeySpace::new(
            &self.config.prefix,
            &self.config.suffix,
            &self.config.separator,
        );
        PersistStore {
            noop: self.noop || !support.can,
            keys,
            engine: self.engine.unwrap_or_else(|| self.ctx.persistent().clone()),
            codec: self.codec.unwrap_or_else(|| Arc::new(ShiftCodec)),
            config: self.config,
            ctx: self.ctx.clone(),
        }
    }

    /// Build the batched variant instead.
    pub fn build_batch(self) -> super::batch::BatchPersistStore {
        super::batch::BatchPersistStore::from_store(self.build())
    }
}

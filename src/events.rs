//! Cross-context change notification
//!
//! One native subscription, unlimited logical listeners. The
//! `ChangeBus` is the delivery surface another execution context (or a
//! test) publishes into; the `ListenerHub` installs exactly one bus
//! subscription — lazily, on the first `on` — and fans each event out
//! to every wrapped handler registered under the changed full key, in
//! registration order.
//!
//! Same-context writes do not self-notify: nothing in this crate
//! publishes to the bus on its own writes.

use crate::engine::EngineKind;
use crate::store::KeySpace;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Event as delivered by the native subscription: the key is the full
/// storage key.
#[derive(Debug, Clone)]
pub struct NativeChangeEvent {
    pub key: String,
    pub new_value: Option<String>,
    pub old_value: Option<String>,
    pub area: EngineKind,
    pub origin: String,
}

/// Event as seen by a listener: the logical key with the namespace
/// stripped, alongside the raw full key.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub key: String,
    pub full_key: String,
    pub new_value: Option<String>,
    pub old_value: Option<String>,
    pub area: EngineKind,
    pub origin: String,
}

/// Handler signature: normalized event first, the native event second.
pub type ChangeHandler = dyn Fn(&ChangeEvent, &NativeChangeEvent) + Send + Sync;

type BusSubscriber = Arc<dyn Fn(&NativeChangeEvent) + Send + Sync>;

/// Process-wide notification surface shared by every context that
/// observes the same engines.
#[derive(Default)]
pub struct ChangeBus {
    subscribers: Mutex<Vec<BusSubscriber>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&NativeChangeEvent) + Send + Sync + 'static) {
        self.subscribers.lock().push(Arc::new(subscriber));
    }

    /// Deliver an event to every subscriber. Subscribers run outside
    /// the bus lock so they may freely subscribe or publish further.
    pub fn publish(&self, event: &NativeChangeEvent) {
        let subscribers: Vec<BusSubscriber> = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Identifies one `on` registration across all keys it covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

struct Registration {
    token: ListenerToken,
    wrapped: BusSubscriber,
}

#[derive(Default)]
struct HubState {
    by_key: AHashMap<String, Vec<Registration>>,
    installed: bool,
}

/// Full key → ordered wrapped handlers. Clones share state.
#[derive(Clone, Default)]
pub struct ListenerHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    state: Mutex<HubState>,
    next_token: AtomicU64,
}

impl ListenerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under every full key, wrapping it with the
    /// instance's key space for event normalization. Installs the
    /// single bus subscription on first use; it is never torn down.
    pub fn register(
        &self,
        bus: &Arc<ChangeBus>,
        full_keys: &[String],
        keys: KeySpace,
        handler: Arc<ChangeHandler>,
    ) -> ListenerToken {
        let token = ListenerToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        let wrapped = wrapped_event_handler(handler, keys);

        let mut state = self.inner.state.lock();
        for full_key in full_keys {
            state
                .by_key
                .entry(full_key.clone())
                .or_default()
                .push(Registration {
                    token,
                    wrapped: wrapped.clone(),
                });
        }
        if !state.installed {
            state.installed = true;
            let weak = Arc::downgrade(&self.inner);
            bus.subscribe(move |event| dispatch(&weak, event));
        }
        token
    }

    /// Drop every handler registered under `full_key`.
    pub fn remove_key(&self, full_key: &str) {
        self.inner.state.lock().by_key.remove(full_key);
    }

    /// Drop only the registration identified by `token` under the
    /// given keys.
    pub fn remove_token(&self, full_keys: &[String], token: ListenerToken) {
        let mut state = self.inner.state.lock();
        for full_key in full_keys {
            let now_empty = match state.by_key.get_mut(full_key) {
                Some(registrations) => {
                    registrations.retain(|r| r.token != token);
                    registrations.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.by_key.remove(full_key);
            }
        }
    }

    /// Number of handlers currently registered under `full_key`.
    pub fn handler_count(&self, full_key: &str) -> usize {
        self.inner
            .state
            .lock()
            .by_key
            .get(full_key)
            .map_or(0, Vec::len)
    }

    /// Number of full keys with at least one handler.
    pub fn key_count(&self) -> usize {
        self.inner.state.lock().by_key.len()
    }
}

fn dispatch(hub: &Weak<HubInner>, event: &NativeChangeEvent) {
    let Some(inner) = hub.upgrade() else { return };
    // snapshot outside the lock: handlers may call back into the hub
    let handlers: Vec<BusSubscriber> = inner
        .state
        .lock()
        .by_key
        .get(&event.key)
        .map(|registrations| registrations.iter().map(|r| r.wrapped.clone()).collect())
        .unwrap_or_default();
    for handler in handlers {
        handler(event);
    }
}

/// Wrap a listener so it receives the normalized event (logical key
/// derived through the instance's key space) alongside the native one.
pub fn wrapped_event_handler(handler: Arc<ChangeHandler>, keys: KeySpace) -> BusSubscriber {
    Arc::new(move |native: &NativeChangeEvent| {
        let normalized = ChangeEvent {
            key: keys.un_full_key(&native.key),
            full_key: native.key.clone(),
            new_value: native.new_value.clone(),
            old_value: native.old_value.clone(),
            area: native.area,
            origin: native.origin.clone(),
        };
        handler(&normalized, native);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event_for(full_key: &str) -> NativeChangeEvent {
        NativeChangeEvent {
            key: full_key.to_string(),
            new_value: Some("abc".to_string()),
            old_value: None,
            area: EngineKind::Persistent,
            origin: "whatever".to_string(),
        }
    }

    #[test]
    fn test_wrapped_handler_normalizes_the_key() {
        let keys = KeySpace::new("_", "_", "_");
        assert_eq!(keys.full_key("test"), "__test__");

        let seen: Arc<Mutex<Vec<(ChangeEvent, NativeChangeEvent)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let wrapped = wrapped_event_handler(
            Arc::new(move |e: &ChangeEvent, native: &NativeChangeEvent| {
                sink.lock().push((e.clone(), native.clone()));
            }),
            keys,
        );

        wrapped(&event_for("__test__"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (normalized, native) = &seen[0];
        assert_eq!(normalized.key, "test");
        assert_eq!(normalized.full_key, "__test__");
        assert_eq!(native.key, "__test__");
        assert_eq!(normalized.new_value.as_deref(), Some("abc"));
        assert_eq!(normalized.old_value, None);
        assert_eq!(normalized.origin, "whatever");
    }

    #[test]
    fn test_single_subscription_fans_out_in_order() {
        let bus = Arc::new(ChangeBus::new());
        let hub = ListenerHub::new();
        let keys = KeySpace::new("", "", "");
        let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        for tag in [1u8, 2, 3] {
            let order = order.clone();
            hub.register(
                &bus,
                &["k".to_string()],
                keys.clone(),
                Arc::new(move |_e, _n| order.lock().push(tag)),
            );
        }
        // three registrations, one bus subscription
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(hub.handler_count("k"), 3);

        bus.publish(&event_for("k"));
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_token_only_drops_that_registration() {
        let bus = Arc::new(ChangeBus::new());
        let hub = ListenerHub::new();
        let keys = KeySpace::new("", "", "");
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let token =
            hub.register(&bus, &["k".to_string()], keys.clone(), {
                Arc::new(move |_e, _n| {
                    c1.fetch_add(1, Ordering::SeqCst);
                })
            });
        let c2 = count.clone();
        hub.register(&bus, &["k".to_string()], keys, {
            Arc::new(move |_e, _n| {
                c2.fetch_add(10, Ordering::SeqCst);
            })
        });

        hub.remove_token(&["k".to_string()], token);
        assert_eq!(hub.handler_count("k"), 1);

        bus.publish(&event_for("k"));
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_remove_key_drops_all_handlers() {
        let bus = Arc::new(ChangeBus::new());
        let hub = ListenerHub::new();
        let keys = KeySpace::new("", "", "");
        for _ in 0..3 {
            hub.register(
                &bus,
                &["k".to_string()],
                keys.clone(),
                Arc::new(|_e, _n| {}),
            );
        }
        assert_eq!(hub.handler_count("k"), 3);
        hub.remove_key("k");
        assert_eq!(hub.handler_count("k"), 0);
        assert_eq!(hub.key_count(), 0);
    }

    #[test]
    fn test_events_for_other_keys_do_not_fire() {
        let bus = Arc::new(ChangeBus::new());
        let hub = ListenerHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        hub.register(
            &bus,
            &["k".to_string()],
            KeySpace::new("", "", ""),
            Arc::new(move |_e, _n| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(&event_for("other"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        bus.publish(&event_for("k"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

//! Change Notification Integration Tests
//!
//! One bus subscription fans out to every registered listener; `off`
//! and friends narrow exactly as documented.

use persist_kv::{
    EngineKind, NativeChangeEvent, Persist, PersistContext, PersistStore, StoreConfig,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn native_event(full_key: &str, new_value: &str) -> NativeChangeEvent {
    NativeChangeEvent {
        key: full_key.to_string(),
        new_value: Some(new_value.to_string()),
        old_value: None,
        area: EngineKind::Persistent,
        origin: "other-context".to_string(),
    }
}

fn scoped_store(ctx: &PersistContext) -> PersistStore {
    PersistStore::new(ctx, StoreConfig::scoped("_", "_", "_"))
}

#[test]
fn test_handler_receives_normalized_and_native_events() {
    let ctx = PersistContext::in_memory();
    let store = scoped_store(&ctx);
    assert_eq!(store.full_key("test"), "__test__");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.on("test", move |normalized, native| {
        sink.lock().push((normalized.clone(), native.clone()));
    });

    ctx.bus().publish(&native_event("__test__", "abc"));

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let (normalized, native) = &seen[0];
    assert_eq!(normalized.key, "test");
    assert_eq!(normalized.full_key, "__test__");
    assert_eq!(native.key, "__test__");
    assert_eq!(normalized.new_value.as_deref(), Some("abc"));
    assert_eq!(normalized.old_value, None);
    assert_eq!(normalized.origin, "other-context");
}

#[test]
fn test_three_handlers_on_one_key_each_fire_once() {
    let ctx = PersistContext::in_memory();
    let store = scoped_store(&ctx);
    let counts: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();

    for count in &counts {
        let count = count.clone();
        store.on("test", move |_e, _n| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }
    // one bus subscription no matter how many listeners
    assert_eq!(ctx.bus().subscriber_count(), 1);
    assert_eq!(ctx.hub().handler_count("__test__"), 3);

    ctx.bus().publish(&native_event("__test__", "abc"));
    for count in &counts {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_off_handler_stops_only_that_registration() {
    let ctx = PersistContext::in_memory();
    let store = scoped_store(&ctx);
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let token = store
        .on("test", move |_e, _n| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    ctx.bus().publish(&native_event("__test__", "abc"));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    store.off_handler("test", token);
    ctx.bus().publish(&native_event("__test__", "abc"));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_one_handler_many_keys() {
    let ctx = PersistContext::in_memory();
    let store = PersistStore::new(&ctx, StoreConfig::default());
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let token = store
        .on("test1,test2,test3", move |_e, _n| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    for key in ["test1", "test2", "test3", "test4"] {
        ctx.bus().publish(&native_event(key, "x"));
    }
    // three of the four dispatches had a listener
    assert_eq!(count.load(Ordering::SeqCst), 3);

    store.off_handler("test1,test2,test3", token);
    for key in ["test1", "test2", "test3"] {
        ctx.bus().publish(&native_event(key, "x"));
    }
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_off_keys_removes_every_handler_for_the_key() {
    let ctx = PersistContext::in_memory();
    let store = scoped_store(&ctx);

    store.on("test", |_e, _n| {});
    store.on("test", |_e, _n| {});
    store.on("test", |_e, _n| {});
    assert_eq!(ctx.hub().handler_count("__test__"), 3);

    store.off_keys("test");
    assert_eq!(ctx.hub().handler_count("__test__"), 0);
}

#[test]
fn test_off_clears_only_this_instances_namespace() {
    let ctx = PersistContext::in_memory();
    let mine = scoped_store(&ctx);
    let theirs = PersistStore::new(&ctx, StoreConfig::scoped("other", "", ":"));

    // listeners exist for keys that are physically present
    for key in ["test", "test2", "test3", "test4"] {
        mine.set_item(key, json!(true));
    }
    theirs.set_item("alien", json!(true));

    mine.on("test", |_e, _n| {});
    mine.on("test", |_e, _n| {});
    mine.on("test", |_e, _n| {});
    mine.on("test2", |_e, _n| {});
    mine.on("test3", |_e, _n| {});
    mine.on("test4", |_e, _n| {});
    theirs.on("alien", |_e, _n| {});

    assert_eq!(ctx.hub().key_count(), 5);
    assert_eq!(ctx.hub().handler_count("__test__"), 3);

    mine.off();
    assert_eq!(ctx.hub().key_count(), 1);
    assert_eq!(ctx.hub().handler_count("other:alien"), 1);
}

#[test]
fn test_events_do_not_leak_across_namespaces() {
    let ctx = PersistContext::in_memory();
    let a = PersistStore::new(&ctx, StoreConfig::scoped("a", "", ":"));
    let b = PersistStore::new(&ctx, StoreConfig::scoped("b", "", ":"));
    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));

    let c = hits_a.clone();
    a.on("test", move |_e, _n| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let c = hits_b.clone();
    b.on("test", move |_e, _n| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    ctx.bus().publish(&native_event("a:test", "x"));
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 0);
}

#[test]
fn test_same_context_writes_do_not_self_notify() {
    let ctx = PersistContext::in_memory();
    let store = scoped_store(&ctx);
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    store.on("test", move |_e, _n| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    store.set_item("test", json!("xyz"));
    store.remove_item("test");
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handler_sees_changes_from_a_sharing_context() {
    // two contexts over one engine and one bus: context B's write,
    // published as a change event, reaches context A's listener
    let ctx_a = PersistContext::in_memory();
    let bus = ctx_a.bus().clone();
    let ctx_b = PersistContext::with_bus(
        ctx_a.persistent().clone(),
        ctx_a.session().clone(),
        bus.clone(),
    );

    let store_a = scoped_store(&ctx_a);
    let store_b = scoped_store(&ctx_b);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    store_a.on("shared", move |normalized, _native| {
        sink.lock().push(normalized.new_value.clone());
    });

    let old_value = ctx_b.persistent().get_item("__shared__");
    store_b.set_item("shared", json!(42));
    bus.publish(&NativeChangeEvent {
        key: "__shared__".to_string(),
        new_value: ctx_b.persistent().get_item("__shared__"),
        old_value,
        area: EngineKind::Persistent,
        origin: "context-b".to_string(),
    });

    assert_eq!(*seen.lock(), vec![Some("42".to_string())]);
}

use super::merge::shallow_merge;
use super::Snapshot;
use crate::config::{Reentrancy, StoreConfig};
use crate::error::{Result, StoreError};
use crate::notifier::{Handler, Notifier, Subscription};
use crate::value::{Record, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use tracing::debug;

#[derive(Default)]
struct Dispatch {
    /// Fan-outs currently on the stack.
    depth: usize,
    /// Snapshots installed during a fan-out under [`Reentrancy::Defer`].
    pending: VecDeque<Snapshot>,
    /// Snapshots deferred since the outermost fan-out started.
    deferred: usize,
}

impl Dispatch {
    /// Leave one fan-out frame. Called with the lock held, so a snapshot
    /// queued by another thread is either seen by the drain or finds
    /// `depth == 0` and dispatches itself.
    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.deferred = 0;
        }
    }
}

struct StoreInner {
    state: RwLock<Snapshot>,
    notifier: Notifier,
    config: StoreConfig,
    dispatch: Mutex<Dispatch>,
}

impl StoreInner {
    fn dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leaves the fan-out frame if a dispatch unwinds before finishing.
struct DepthGuard<'a> {
    inner: &'a StoreInner,
    armed: bool,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.dispatch().leave();
        }
    }
}

/// The shared store: one current snapshot plus the notifier that fans every
/// new snapshot out to subscribers.
///
/// The snapshot is replaced wholesale on every mutation and never edited in
/// place. Cloning a `Store` yields another handle to the same state.
///
/// # Examples
///
/// ```
/// use global_states::Store;
/// use serde_json::json;
///
/// let store = Store::new();
/// store.update(json!({"user": {"name": "a"}})).unwrap();
///
/// let update_cart = store.update_sub_property("cart");
/// update_cart.apply(json!({"items": []})).unwrap();
/// update_cart.apply(json!({"quantity": 5})).unwrap();
///
/// let cart = store.get("cart").unwrap();
/// assert_eq!(cart.get("quantity").and_then(|q| q.as_f64()), Some(5.0));
/// assert!(cart.get("items").is_some());
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with `config`.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_state(config, Record::new())
    }

    /// Create a store whose first snapshot is `initial`. No handler exists
    /// yet, so nothing is notified.
    pub fn with_state(config: StoreConfig, initial: Record) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(initial)),
                notifier: Notifier::new(config.warn_on_duplicate_subscribe),
                config,
                dispatch: Mutex::new(Dispatch::default()),
            }),
        }
    }

    /// The process-wide store, created on first use with the default
    /// configuration.
    pub fn global() -> Store {
        static GLOBAL: OnceLock<Store> = OnceLock::new();
        GLOBAL.get_or_init(Store::new).clone()
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The handler registry notified after every mutation.
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// The current snapshot, shared.
    pub fn current(&self) -> Snapshot {
        Arc::clone(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// A shallow copy of the current snapshot. Mutating it does not affect
    /// the store.
    pub fn get_snapshot(&self) -> Record {
        self.current().as_ref().clone()
    }

    /// Read one property of the current snapshot.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.current().get(name).cloned()
    }

    /// Read the current snapshot without copying it.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Record) -> R,
    {
        f(&self.current())
    }

    /// Install `new_state` verbatim as the current snapshot.
    ///
    /// Fails with [`StoreError::InvalidArgument`] if `new_state` is not a
    /// record.
    pub fn replace(&self, new_state: impl Into<Value>) -> Result<()> {
        let new_state = expect_record(new_state.into(), "replace")?;
        self.commit("replace", |_| new_state)
    }

    /// Shallow-merge `partial` into the current snapshot.
    ///
    /// Fails with [`StoreError::InvalidArgument`] if `partial` is not a
    /// record; the store is left untouched.
    pub fn update(&self, partial: impl Into<Value>) -> Result<()> {
        let partial = expect_record(partial.into(), "update")?;
        self.commit("update", |current| shallow_merge(current, partial))
    }

    /// An updater bound to the property `name`. Each call shallow-merges its
    /// payload into the record stored at `name`, keeping fields set by
    /// earlier calls.
    pub fn update_sub_property(&self, name: impl Into<String>) -> SubPropertyUpdater {
        SubPropertyUpdater {
            store: self.clone(),
            name: name.into(),
        }
    }

    /// Register a handler for every future snapshot. See
    /// [`Notifier::subscribe`].
    pub fn subscribe(&self, handler: Handler) -> bool {
        self.inner.notifier.subscribe(handler)
    }

    /// Remove a handler registered with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, handler: &Handler) -> bool {
        self.inner.notifier.unsubscribe(handler)
    }

    /// Register a handler, unsubscribed when the returned guard drops.
    pub fn watch(&self, handler: Handler) -> Subscription {
        self.inner.notifier.watch(handler)
    }

    /// Compute the next snapshot from the current one, install it, and
    /// dispatch it according to the reentrancy policy.
    fn commit<F>(&self, op: &'static str, next: F) -> Result<()>
    where
        F: FnOnce(&Record) -> Record,
    {
        let inner = &*self.inner;
        let limit = inner.config.max_update_depth;
        let defer = inner.config.reentrancy == Reentrancy::Defer;
        let mut dispatch = inner.dispatch();
        let nested = dispatch.depth > 0;

        match inner.config.reentrancy {
            Reentrancy::Reject if nested => return Err(StoreError::ReentrantUpdate),
            Reentrancy::Recurse if dispatch.depth >= limit => {
                return Err(StoreError::UpdateDepthExceeded { limit });
            }
            Reentrancy::Defer if nested && dispatch.deferred >= limit => {
                return Err(StoreError::UpdateDepthExceeded { limit });
            }
            _ => {}
        }

        let snapshot = {
            let mut state = inner.state.write().unwrap_or_else(PoisonError::into_inner);
            let snapshot = Arc::new(next(&state));
            *state = Arc::clone(&snapshot);
            snapshot
        };
        debug!(op, keys = snapshot.len(), depth = dispatch.depth, "installed snapshot");

        if nested && defer {
            dispatch.deferred += 1;
            dispatch.pending.push_back(snapshot);
            return Ok(());
        }

        dispatch.depth += 1;
        drop(dispatch);
        let mut guard = DepthGuard { inner, armed: true };

        inner.notifier.notify(&snapshot);
        loop {
            let mut dispatch = inner.dispatch();
            let queued = if defer { dispatch.pending.pop_front() } else { None };
            match queued {
                Some(queued) => {
                    drop(dispatch);
                    inner.notifier.notify(&queued);
                }
                None => {
                    dispatch.leave();
                    guard.armed = false;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.current())
            .field("notifier", &self.inner.notifier)
            .field("config", &self.inner.config)
            .finish()
    }
}

fn expect_record(value: Value, op: &str) -> Result<Record> {
    match value {
        Value::Record(record) => Ok(Arc::unwrap_or_clone(record)),
        other => Err(StoreError::invalid(format!(
            "{op} expects a record, got {}",
            other.kind()
        ))),
    }
}

/// Updater returned by [`Store::update_sub_property`].
#[derive(Clone, Debug)]
pub struct SubPropertyUpdater {
    store: Store,
    name: String,
}

impl SubPropertyUpdater {
    /// The property this updater patches.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shallow-merge `partial` into the record at this property.
    ///
    /// A missing property starts from an empty record. A property holding
    /// something other than a record, including a sequence, is replaced by
    /// `partial`; sequence elements are not carried over as index keys.
    pub fn apply(&self, partial: impl Into<Value>) -> Result<()> {
        let partial = expect_record(partial.into(), "update_sub_property")?;
        let name = self.name.as_str();
        self.store.commit("update_sub_property", |current| {
            let merged_sub = match current.get(name) {
                Some(Value::Record(sub)) => shallow_merge(sub, partial),
                Some(other) => {
                    debug!(property = name, kind = other.kind(), "replacing non-record property");
                    partial
                }
                None => partial,
            };
            let mut next = current.clone();
            next.insert(name.to_owned(), Value::record(merged_sub));
            next
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::handler;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = Arc::clone(counter);
        handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn store_get_replace() {
        let store = Store::new();
        assert!(store.get_snapshot().is_empty());

        store.update(json!({"count": 1, "name": "test"})).unwrap();
        store.replace(json!({"count": 42})).unwrap();

        assert_eq!(store.get("count"), Some(Value::Number(42.0)));
        assert_eq!(store.get("name"), None);
    }

    #[test]
    fn store_update_merges_shallowly() {
        let store = Store::new();
        store.update(json!({"a": 1, "b": {"x": 1}})).unwrap();
        store.update(json!({"b": {"y": 2}, "c": 3})).unwrap();

        assert_eq!(
            Value::record(store.get_snapshot()),
            v(json!({"a": 1, "b": {"y": 2}, "c": 3}))
        );
    }

    #[test]
    fn snapshot_copy_is_detached() {
        let store = Store::new();
        store.update(json!({"a": 1})).unwrap();

        let mut copy = store.get_snapshot();
        copy.insert("a".into(), Value::from(2));
        copy.insert("b".into(), Value::from(3));

        assert_eq!(store.get("a"), Some(Value::from(1)));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn snapshots_are_never_mutated_in_place() {
        let store = Store::new();
        store.update(json!({"a": 1})).unwrap();
        let before = store.current();
        store.update(json!({"a": 2})).unwrap();

        assert_eq!(before.get("a"), Some(&Value::from(1)));
        assert!(!Arc::ptr_eq(&before, &store.current()));
    }

    #[test]
    fn non_record_payload_is_rejected() {
        let store = Store::new();
        store.update(json!({"a": 1})).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        store.subscribe(counting(&calls));

        let err = store.update(json!([1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument { .. }));
        assert!(store.replace(7).is_err());
        assert!(store.update_sub_property("a").apply("x").is_err());

        assert_eq!(store.get("a"), Some(Value::from(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sub_property_updates_accumulate() {
        let store = Store::new();
        store.update(json!({"user": {"name": "a"}})).unwrap();

        let update_cart = store.update_sub_property("cart");
        update_cart.apply(json!({"items": []})).unwrap();
        update_cart.apply(json!({"quantity": 5})).unwrap();

        assert_eq!(
            store.get("cart"),
            Some(v(json!({"items": [], "quantity": 5})))
        );
        assert_eq!(store.get("user"), Some(v(json!({"name": "a"}))));
    }

    #[test]
    fn sub_property_over_scalar_starts_fresh() {
        let store = Store::new();
        store.update(json!({"cart": 3})).unwrap();
        store
            .update_sub_property("cart")
            .apply(json!({"quantity": 1}))
            .unwrap();
        assert_eq!(store.get("cart"), Some(v(json!({"quantity": 1}))));
    }

    #[test]
    fn sub_property_over_sequence_is_replaced() {
        let store = Store::new();
        store.update(json!({"cart": ["apple", "pear"]})).unwrap();
        store
            .update_sub_property("cart")
            .apply(json!({"quantity": 1}))
            .unwrap();
        assert_eq!(store.get("cart"), Some(v(json!({"quantity": 1}))));
    }

    #[test]
    fn every_mutation_notifies_once() {
        let store = Store::new();
        let calls = Arc::new(AtomicUsize::new(0));
        store.subscribe(counting(&calls));

        store.update(json!({"a": 1})).unwrap();
        store.replace(json!({})).unwrap();
        store.update_sub_property("b").apply(json!({})).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handler_sees_installed_snapshot() {
        let store = Store::new();
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            let reader = store.clone();
            store.subscribe(handler(move |snapshot| {
                assert!(Arc::ptr_eq(snapshot, &reader.current()));
                *seen.lock().unwrap() = snapshot.get("a").cloned();
            }));
        }

        store.update(json!({"a": "x"})).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(Value::from("x")));
    }

    /// Record the value of `n` in every snapshot delivered, and bump `n`
    /// from inside the first handler until it reaches 3.
    fn chain(store: &Store) -> Arc<Mutex<Vec<(&'static str, f64)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            let writer = store.clone();
            store.subscribe(handler(move |snapshot| {
                let n = snapshot.get("n").and_then(Value::as_f64).unwrap_or(0.0);
                log.lock().unwrap().push(("first", n));
                if n < 3.0 {
                    let _ = writer.update(json!({"n": n + 1.0}));
                }
            }));
        }
        {
            let log = Arc::clone(&log);
            store.subscribe(handler(move |snapshot| {
                let n = snapshot.get("n").and_then(Value::as_f64).unwrap_or(0.0);
                log.lock().unwrap().push(("second", n));
            }));
        }
        log
    }

    #[test]
    fn deferred_updates_finish_each_fan_out_first() {
        let store = Store::new();
        let log = chain(&store);

        store.update(json!({"n": 0})).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("first", 0.0),
                ("second", 0.0),
                ("first", 1.0),
                ("second", 1.0),
                ("first", 2.0),
                ("second", 2.0),
                ("first", 3.0),
                ("second", 3.0),
            ]
        );
        assert_eq!(store.get("n"), Some(Value::from(3)));
    }

    #[test]
    fn recursive_updates_run_nested_fan_out_first() {
        let store = Store::with_config(StoreConfig::default().with_reentrancy(Reentrancy::Recurse));
        let log = chain(&store);

        store.update(json!({"n": 0})).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("first", 0.0),
                ("first", 1.0),
                ("first", 2.0),
                ("first", 3.0),
                ("second", 3.0),
                ("second", 2.0),
                ("second", 1.0),
                ("second", 0.0),
            ]
        );
    }

    #[test]
    fn recursion_is_bounded() {
        let store = Store::with_config(
            StoreConfig::default()
                .with_reentrancy(Reentrancy::Recurse)
                .with_max_update_depth(2),
        );
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            let writer = store.clone();
            store.subscribe(handler(move |snapshot| {
                let n = snapshot.get("n").and_then(Value::as_f64).unwrap_or(0.0);
                if let Err(err) = writer.update(json!({"n": n + 1.0})) {
                    errors.lock().unwrap().push(err);
                }
            }));
        }

        store.update(json!({"n": 0})).unwrap();

        assert_eq!(
            *errors.lock().unwrap(),
            vec![StoreError::UpdateDepthExceeded { limit: 2 }]
        );
        assert_eq!(store.get("n"), Some(Value::from(1)));
    }

    #[test]
    fn deferred_updates_are_bounded() {
        let store = Store::with_config(StoreConfig::default().with_max_update_depth(4));
        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            let writer = store.clone();
            store.subscribe(handler(move |snapshot| {
                let n = snapshot.get("n").and_then(Value::as_f64).unwrap_or(0.0);
                if let Err(err) = writer.update(json!({"n": n + 1.0})) {
                    errors.lock().unwrap().push(err);
                }
            }));
        }

        store.update(json!({"n": 0})).unwrap();

        // Four deferred snapshots drain, the fifth nested update is refused.
        assert_eq!(
            *errors.lock().unwrap(),
            vec![StoreError::UpdateDepthExceeded { limit: 4 }]
        );
        assert_eq!(store.get("n"), Some(Value::from(4)));

        // The budget is per outermost update.
        errors.lock().unwrap().clear();
        store.update(json!({"n": 0})).unwrap();
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(store.get("n"), Some(Value::from(4)));
    }

    #[test]
    fn dispatch_state_resets_after_fan_out() {
        let store = Store::new();
        let _log = chain(&store);
        store.subscribe(handler(|_| panic!("handler failure")));

        store.update(json!({"n": 0})).unwrap();

        let dispatch = store.inner.dispatch();
        assert_eq!(dispatch.depth, 0);
        assert_eq!(dispatch.deferred, 0);
        assert!(dispatch.pending.is_empty());
    }

    #[test]
    fn concurrent_updates_are_all_delivered() {
        let store = Store::new();
        let last_seen: Arc<Mutex<Option<Snapshot>>> = Arc::new(Mutex::new(None));
        {
            let last_seen = Arc::clone(&last_seen);
            store.subscribe(handler(move |snapshot| {
                *last_seen.lock().unwrap() = Some(Arc::clone(snapshot));
            }));
        }

        for _ in 0..20 {
            let threads: Vec<_> = (0..4)
                .map(|t| {
                    let store = store.clone();
                    std::thread::spawn(move || {
                        for i in 0..200 {
                            store.update(json!({ format!("t{t}"): i })).unwrap();
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }

            // The newest installed snapshot is always the last one delivered.
            let delivered = last_seen.lock().unwrap().clone().unwrap();
            assert!(Arc::ptr_eq(&delivered, &store.current()));
            assert_eq!(store.inner.dispatch().depth, 0);
        }
    }

    #[test]
    fn rejecting_policy_refuses_nested_updates() {
        let store = Store::with_config(StoreConfig::default().with_reentrancy(Reentrancy::Reject));
        let result = Arc::new(Mutex::new(None));
        {
            let result = Arc::clone(&result);
            let writer = store.clone();
            store.subscribe(handler(move |_| {
                *result.lock().unwrap() = Some(writer.update(json!({"nested": true})));
            }));
        }

        store.update(json!({"a": 1})).unwrap();

        assert_eq!(
            *result.lock().unwrap(),
            Some(Err(StoreError::ReentrantUpdate))
        );
        assert_eq!(store.get("nested"), None);

        // Depth is restored once the fan-out ends.
        store.update(json!({"a": 2})).unwrap();
    }

    #[test]
    fn panicking_handler_does_not_poison_the_store() {
        let store = Store::new();
        store.subscribe(handler(|_| panic!("handler failure")));
        store.update(json!({"a": 1})).unwrap();
        store.update(json!({"a": 2})).unwrap();
        assert_eq!(store.get("a"), Some(Value::from(2)));
    }

    #[test]
    fn global_store_is_shared() {
        let a = Store::global();
        let b = Store::global();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}

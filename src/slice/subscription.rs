use crate::notifier::{handler, Subscription};
use crate::store::Store;
use crate::value::{records_equal, Record};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// The part of a snapshot a subscriber asked for.
pub type Slice = Record;

/// Re-render signal invoked with the new slice whenever it changes.
pub type Listener = Arc<dyn Fn(&Slice) + Send + Sync>;

/// Restrict `snapshot` to `names`. Names missing from the snapshot are left
/// out of the slice rather than set to `Null`.
pub fn select(snapshot: &Record, names: &[String]) -> Slice {
    names
        .iter()
        .filter_map(|name| {
            snapshot
                .get(name)
                .map(|value| (name.clone(), value.clone()))
        })
        .collect()
}

struct SliceState {
    slice: Arc<Slice>,
    version: u64,
}

/// A live view of some properties of a [`Store`].
///
/// The view registers a handler on activation and unregisters it when
/// dropped. On every notification it recomputes its slice and, only if the
/// slice differs from the last one under bounded equality, stores it and
/// calls its listener.
///
/// The subscribed names are fixed for the lifetime of the instance; watching
/// different names needs a new `SliceSubscription`.
pub struct SliceSubscription {
    names: Arc<[String]>,
    state: Arc<RwLock<SliceState>>,
    subscription: Subscription,
}

impl SliceSubscription {
    /// Activate a view with no re-render signal. Poll [`get`](Self::get) or
    /// [`version`](Self::version) to observe changes.
    pub fn new<I, S>(store: &Store, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::activate(store, names, None)
    }

    /// Activate a view that calls `listener` after each slice change.
    pub fn with_listener<I, S, F>(store: &Store, names: I, listener: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Slice) + Send + Sync + 'static,
    {
        Self::activate(store, names, Some(Arc::new(listener)))
    }

    fn activate<I, S>(store: &Store, names: I, listener: Option<Listener>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Arc<[String]> = names.into_iter().map(Into::into).collect();
        let state = Arc::new(RwLock::new(SliceState {
            slice: Arc::new(select(&store.current(), &names)),
            version: 0,
        }));

        let on_snapshot = {
            let names = Arc::clone(&names);
            let state = Arc::clone(&state);
            handler(move |snapshot| {
                let next = select(snapshot, &names);
                let changed = {
                    let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                    if records_equal(&state.slice, &next, 1) {
                        None
                    } else {
                        state.slice = Arc::new(next);
                        state.version += 1;
                        Some(Arc::clone(&state.slice))
                    }
                };
                if let Some(slice) = changed {
                    debug!(names = ?names, "slice changed");
                    if let Some(listener) = &listener {
                        listener(&slice);
                    }
                }
            })
        };

        Self {
            names,
            state,
            subscription: store.watch(on_snapshot),
        }
    }

    /// The last delivered slice.
    pub fn get(&self) -> Arc<Slice> {
        Arc::clone(&self.read().slice)
    }

    pub fn with<R>(&self, f: impl FnOnce(&Slice) -> R) -> R {
        f(&self.read().slice)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of slice changes delivered since activation.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Unregister from the store. Equivalent to dropping the subscription.
    pub fn deactivate(self) {
        self.subscription.unsubscribe();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SliceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SliceSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("SliceSubscription")
            .field("names", &self.names)
            .field("slice", &state.slice)
            .field("version", &state.version)
            .finish()
    }
}

/// Hook-style entry point: a live slice of `store` restricted to `names`.
///
/// # Examples
///
/// ```
/// use global_states::{use_subscribed_slice, Store};
/// use serde_json::json;
///
/// let store = Store::new();
/// let user = use_subscribed_slice(&store, ["user"]);
/// assert!(user.get().is_empty());
///
/// store.update(json!({"user": {"name": "a"}})).unwrap();
/// assert_eq!(user.version(), 1);
///
/// store.update(json!({"other": 1})).unwrap();
/// assert_eq!(user.version(), 1);
/// ```
pub fn use_subscribed_slice<I, S>(store: &Store, names: I) -> SliceSubscription
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SliceSubscription::new(store, names)
}

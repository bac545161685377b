use crate::store::Snapshot;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{error, trace, warn};

/// A notification callback. Identity is the `Arc` allocation: two handlers
/// are the same handler only if they point at the same closure.
pub type Handler = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Box a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Snapshot) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A registered handler. `live` is cleared on removal so a fan-out working
/// from a copied list can skip it without searching the registry.
#[derive(Clone)]
struct Entry {
    handler: Handler,
    live: Arc<AtomicBool>,
}

impl Entry {
    fn new(handler: Handler) -> Self {
        Self {
            handler,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    fn is(&self, handler: &Handler) -> bool {
        Arc::ptr_eq(&self.handler, handler)
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

struct Registry {
    entries: RwLock<Vec<Entry>>,
    warn_on_duplicate: bool,
}

impl Registry {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, handler: &Handler) -> bool {
        let mut entries = self.write();
        match entries.iter().position(|e| e.is(handler)) {
            Some(index) => {
                let entry = entries.remove(index);
                entry.live.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

/// Ordered registry of handlers that receive every new store snapshot.
///
/// Cloning a `Notifier` yields another handle to the same registry.
#[derive(Clone)]
pub struct Notifier {
    registry: Arc<Registry>,
}

impl Notifier {
    pub fn new(warn_on_duplicate: bool) -> Self {
        Self {
            registry: Arc::new(Registry {
                entries: RwLock::new(Vec::new()),
                warn_on_duplicate,
            }),
        }
    }

    /// Register `handler` unless it is already registered.
    ///
    /// Returns `true` if the handler was added.
    pub fn subscribe(&self, handler: Handler) -> bool {
        let mut entries = self.registry.write();
        if entries.iter().any(|e| e.is(&handler)) {
            if self.registry.warn_on_duplicate {
                warn!("handler is already subscribed; ignoring");
            }
            return false;
        }
        entries.push(Entry::new(handler));
        trace!(handlers = entries.len(), "handler subscribed");
        true
    }

    /// Remove `handler` if present. Returns `true` if it was registered.
    pub fn unsubscribe(&self, handler: &Handler) -> bool {
        let removed = self.registry.remove(handler);
        if removed {
            trace!(handlers = self.len(), "handler unsubscribed");
        }
        removed
    }

    /// Register `handler` and return a guard that unsubscribes it on drop.
    ///
    /// If the handler was already registered, dropping the guard still
    /// removes that earlier registration.
    pub fn watch(&self, handler: Handler) -> Subscription {
        self.subscribe(Arc::clone(&handler));
        Subscription {
            handler,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn contains(&self, handler: &Handler) -> bool {
        self.registry.read().iter().any(|e| e.is(handler))
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Invoke every registered handler with `snapshot`, in registration
    /// order.
    ///
    /// The handler list is copied before the fan-out starts and no lock is
    /// held while handlers run, so handlers may subscribe, unsubscribe, or
    /// touch the store. A handler removed mid fan-out is skipped if it has
    /// not run yet; a handler added mid fan-out first runs on the next
    /// notification. A panicking handler is logged and does not stop the
    /// rest.
    ///
    /// Returns the number of handlers that panicked.
    pub fn notify(&self, snapshot: &Snapshot) -> usize {
        let entries = self.registry.read().clone();
        trace!(handlers = entries.len(), keys = snapshot.len(), "notifying handlers");

        let mut panicked = 0;
        for entry in &entries {
            if !entry.is_live() {
                continue;
            }
            let handler = &entry.handler;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(snapshot))) {
                panicked += 1;
                error!(
                    reason = panic_message(payload.as_ref()),
                    "store handler panicked; continuing fan-out"
                );
            }
        }
        panicked
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("handlers", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// RAII guard for a registered handler.
///
/// Dropping the guard unsubscribes the handler. The guard does not keep the
/// registry alive.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    handler: Handler,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.handler);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &(self.registry.strong_count() > 0))
            .finish()
    }
}

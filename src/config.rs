//! Store configuration.

/// What happens when a handler mutates the store while a notification
/// fan-out is still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reentrancy {
    /// Install the nested snapshot at once, but queue its fan-out until the
    /// outer fan-out has finished. Queued snapshots are delivered in order.
    /// At most [`StoreConfig::max_update_depth`] snapshots are queued per
    /// outermost update; the next one fails with
    /// [`StoreError::UpdateDepthExceeded`].
    ///
    /// [`StoreError::UpdateDepthExceeded`]: crate::StoreError::UpdateDepthExceeded
    #[default]
    Defer,
    /// Run the nested fan-out to completion before returning to the outer
    /// one, up to [`StoreConfig::max_update_depth`] levels.
    Recurse,
    /// Fail nested mutations with [`StoreError::ReentrantUpdate`].
    ///
    /// [`StoreError::ReentrantUpdate`]: crate::StoreError::ReentrantUpdate
    Reject,
}

/// Tunables for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub reentrancy: Reentrancy,
    /// Upper bound on nested fan-outs under [`Reentrancy::Recurse`], and on
    /// snapshots queued during one outermost update under
    /// [`Reentrancy::Defer`].
    pub max_update_depth: usize,
    /// Log a warning when a handler that is already registered is
    /// subscribed again.
    pub warn_on_duplicate_subscribe: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reentrancy: Reentrancy::Defer,
            max_update_depth: 32,
            warn_on_duplicate_subscribe: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_reentrancy(mut self, reentrancy: Reentrancy) -> Self {
        self.reentrancy = reentrancy;
        self
    }

    #[must_use]
    pub fn with_max_update_depth(mut self, depth: usize) -> Self {
        self.max_update_depth = depth.max(1);
        self
    }

    #[must_use]
    pub fn with_duplicate_warning(mut self, enabled: bool) -> Self {
        self.warn_on_duplicate_subscribe = enabled;
        self
    }
}

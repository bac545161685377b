//! # Global States
//!
//! A single shared store for component-based user interfaces, with
//! subscriptions that wake a component only when the part of the store it
//! reads has changed.
//!
//! ## Store
//!
//! - [`Store`] - one current snapshot, replaced wholesale on every mutation
//! - [`Store::update`] - shallow merge of a partial record
//! - [`Store::update_sub_property`] - repeated patches of one named record
//! - [`Notifier`] - registration-order fan-out with per-handler panic isolation
//!
//! ## Subscriptions
//!
//! - [`use_subscribed_slice`] - hook-style live slice of named properties
//! - [`wrap_with_slice`] - wrapper-style component receiving the slice as props
//! - [`bounded_equal`] - the two-level structural equality deciding whether a
//!   slice changed

pub mod config;
pub mod error;
pub mod notifier;
pub mod slice;
pub mod store;
pub mod value;

// Re-export main types for convenience
pub use config::{Reentrancy, StoreConfig};
pub use error::{Result, StoreError};
pub use notifier::{handler, Handler, Notifier, Subscription};
pub use slice::{
    use_subscribed_slice, wrap_with_slice, Component, Connected, Props, Slice, SliceSubscription,
};
pub use store::{shallow_merge, Snapshot, Store, SubPropertyUpdater};
pub use value::{bounded_equal, shallow_equal, Record, Value};

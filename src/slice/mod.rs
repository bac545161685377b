//! Subscription adapters: live, filtered views of a store for UI
//! components.
//!
//! Two shapes share one mechanism:
//! - [`use_subscribed_slice`] returns a [`SliceSubscription`] that keeps the
//!   requested properties current (hook style).
//! - [`wrap_with_slice`] returns a [`Connected`] component that renders its
//!   inner component with the slice merged under its own props (wrapper
//!   style).
//!
//! Either way a store notification only reaches the host's re-render signal
//! when the slice changed under [`bounded_equal`](crate::bounded_equal).

mod connect;
mod subscription;

pub use connect::{wrap_with_slice, Component, Connected, Props};
pub use subscription::{select, use_subscribed_slice, Listener, Slice, SliceSubscription};

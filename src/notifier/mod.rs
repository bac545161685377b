//! Publish-subscribe fan-out of store snapshots.

mod pubsub;

pub use pubsub::{handler, Handler, Notifier, Subscription};

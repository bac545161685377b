//! The shared store and its merge semantics.
//!
//! A store holds exactly one current snapshot. Mutations build a new
//! snapshot from the current one, install it, and notify every registered
//! handler before returning.

mod merge;
mod store;

pub use merge::shallow_merge;
pub use store::{Store, SubPropertyUpdater};

use crate::value::Record;
use std::sync::Arc;

/// One complete, immutable version of the store.
pub type Snapshot = Arc<Record>;

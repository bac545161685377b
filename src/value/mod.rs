//! The value model stored in a [`Store`](crate::Store) and the bounded
//! equality used to compare values.

mod equal;
mod value;

pub use equal::{bounded_equal, records_equal, shallow_equal, MAX_STRUCTURAL_DEPTH};
pub use value::{Record, Value};

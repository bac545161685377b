use crate::value::Record;

/// Combine `base` and `partial`: every key of `partial` overwrites the same
/// key of `base`, keys only in `base` are kept.
///
/// Existing keys keep their position; new keys are appended in `partial`'s
/// order.
pub fn shallow_merge(base: &Record, partial: Record) -> Record {
    let mut merged = base.clone();
    merged.extend(partial);
    merged
}

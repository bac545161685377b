//! Bounded-depth structural equality.
//!
//! Deciding whether a subscriber must re-render by full deep equality is
//! both costly on large state and unbounded on shared structure. Instead,
//! containers are compared structurally only at the first
//! [`MAX_STRUCTURAL_DEPTH`] levels; anything nested deeper is compared by
//! identity, so a fresh but equal container below the cap reads as
//! "changed".

use super::value::{epoch_millis, Record, Value};
use std::sync::Arc;

/// Deepest level at which records and sequences are walked.
pub const MAX_STRUCTURAL_DEPTH: usize = 2;

/// [`bounded_equal`] starting at depth 1.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    bounded_equal(a, b, 1)
}

/// Compare two values, walking containers while `depth <= 2`.
///
/// - `Null` equals only `Null`.
/// - Two records (or two sequences) within the cap are equal when every
///   entry of each side has a bounded-equal counterpart on the other side at
///   `depth + 1`.
/// - Timestamps compare by millisecond instant at any depth.
/// - Everything else compares by value for scalars and by identity for
///   containers.
pub fn bounded_equal(a: &Value, b: &Value, depth: usize) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Record(x), Value::Record(y)) if depth <= MAX_STRUCTURAL_DEPTH => {
            records_equal(x, y, depth)
        }
        (Value::Sequence(x), Value::Sequence(y)) if depth <= MAX_STRUCTURAL_DEPTH => {
            sequences_equal(x, y, depth)
        }
        (Value::Timestamp(x), Value::Timestamp(y)) => epoch_millis(*x) == epoch_millis(*y),
        _ => identical(a, b),
    }
}

/// Compare two records as if both sat at `depth`; their entries are compared
/// at `depth + 1`.
pub fn records_equal(a: &Record, b: &Record, depth: usize) -> bool {
    let covers = |from: &Record, to: &Record, flip: bool| {
        from.iter().all(|(key, value)| match to.get(key) {
            Some(other) if flip => bounded_equal(other, value, depth + 1),
            Some(other) => bounded_equal(value, other, depth + 1),
            None => false,
        })
    };
    covers(a, b, false) && covers(b, a, true)
}

fn sequences_equal(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| bounded_equal(x, y, depth + 1))
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Record(x), Value::Record(y)) => Arc::ptr_eq(x, y),
        (Value::Sequence(x), Value::Sequence(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn null_handling() {
        assert!(shallow_equal(&Value::Null, &Value::Null));
        assert!(!shallow_equal(&Value::Null, &v(json!(0))));
        assert!(!shallow_equal(&v(json!({})), &Value::Null));
    }

    #[test]
    fn depth_one_compares_top_level_keys() {
        assert!(shallow_equal(&v(json!({"a": 1})), &v(json!({"a": 1}))));
        assert!(!shallow_equal(&v(json!({"a": 1})), &v(json!({"a": 2}))));
    }

    #[test]
    fn key_added_on_either_side_is_a_difference() {
        assert!(!shallow_equal(&v(json!({"a": 1})), &v(json!({"a": 1, "b": 2}))));
        assert!(!shallow_equal(&v(json!({"a": 1, "b": 2})), &v(json!({"a": 1}))));
        assert!(!shallow_equal(&v(json!({"a": null})), &v(json!({}))));
    }

    #[test]
    fn depth_two_is_walked() {
        assert!(shallow_equal(&v(json!({"a": {"b": 1}})), &v(json!({"a": {"b": 1}}))));
        assert!(!shallow_equal(&v(json!({"a": {"b": 1}})), &v(json!({"a": {"b": 2}}))));
        assert!(shallow_equal(&v(json!({"a": [1, 2]})), &v(json!({"a": [1, 2]}))));
        assert!(!shallow_equal(&v(json!({"a": [1, 2]})), &v(json!({"a": [1, 2, 3]}))));
    }

    #[test]
    fn depth_three_compares_by_identity() {
        // Fresh containers at depth 3 are never equal, even with equal contents.
        assert!(!shallow_equal(
            &v(json!({"a": {"b": {"c": 1}}})),
            &v(json!({"a": {"b": {"c": 1}}}))
        ));
        assert!(!shallow_equal(&v(json!({"a": {"b": []}})), &v(json!({"a": {"b": []}}))));

        // A shared container at depth 3 is equal.
        let inner = v(json!({"c": 1}));
        let left: Value = [("a", [("b", inner.clone())].into_iter().collect::<Value>())]
            .into_iter()
            .collect();
        let right: Value = [("a", [("b", inner)].into_iter().collect::<Value>())]
            .into_iter()
            .collect();
        assert!(shallow_equal(&left, &right));

        // Scalars at depth 3 still compare by value.
        assert!(shallow_equal(&v(json!({"a": {"b": "x"}})), &v(json!({"a": {"b": "x"}}))));
    }

    #[test]
    fn starting_depth_shifts_the_cap() {
        let a = v(json!({"b": 1}));
        let b = v(json!({"b": 1}));
        assert!(bounded_equal(&a, &b, 2));
        assert!(!bounded_equal(&a, &b, 3));
        assert!(bounded_equal(&a, &a.clone(), 3));
    }

    #[test]
    fn record_and_sequence_never_match() {
        assert!(!shallow_equal(&v(json!({})), &v(json!([]))));
    }

    #[test]
    fn timestamps_compare_by_millisecond() {
        let t = UNIX_EPOCH + Duration::from_millis(1_000);
        let a = Value::Timestamp(t);
        let b = Value::Timestamp(t + Duration::from_micros(400));
        let c = Value::Timestamp(t + Duration::from_millis(1));
        assert!(shallow_equal(&a, &b));
        assert!(!shallow_equal(&a, &c));

        // Not subject to the depth cap.
        assert!(bounded_equal(&a, &b, 5));
    }

    #[test]
    fn nan_is_never_equal() {
        let nan = Value::Number(f64::NAN);
        assert!(!shallow_equal(&nan, &nan.clone()));
    }
}

//! Value comparison and coercion helpers shared by the in-memory adapters

use serde_json::Value;
use std::cmp::Ordering;

/// Numeric view of a value, when it has one
pub fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Wrap a float back into a JSON number, collapsing integral results to i64
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Equality with numeric coercion (1 == 1.0) and exact match otherwise
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Case-insensitive prefix match; false for non-string values
pub fn string_prefix_match(value: &Value, prefix: &str) -> bool {
    value
        .as_str()
        .map(|s| s.to_lowercase().starts_with(&prefix.to_lowercase()))
        .unwrap_or(false)
}

/// Total order over JSON values for sorting rows
///
/// Null sorts first, then booleans, numbers, strings (case-insensitive),
/// then everything else by its JSON text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) => {
            let x = as_f64(a).unwrap_or(f64::NAN);
            let y = as_f64(b).unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            let folded = x.to_lowercase().cmp(&y.to_lowercase());
            if folded == Ordering::Equal {
                x.cmp(y)
            } else {
                folded
            }
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_comparison_is_case_insensitive() {
        let mut values = vec![json!("banana"), json!("Apple"), json!("cherry")];
        values.sort_by(compare_values);
        assert_eq!(values, vec![json!("Apple"), json!("banana"), json!("cherry")]);
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert_eq!(compare_values(&json!(2), &json!(2.0)), Ordering::Equal);
        assert_eq!(compare_values(&json!(1), &json!(1.5)), Ordering::Less);
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
    }

    #[test]
    fn prefix_match_ignores_case() {
        assert!(string_prefix_match(&json!("Banana"), "ba"));
        assert!(!string_prefix_match(&json!("cherry"), "ba"));
        assert!(!string_prefix_match(&json!(42), "4"));
    }

    #[test]
    fn integral_results_collapse_to_integers() {
        assert_eq!(number_value(6.0), json!(6));
        assert_eq!(number_value(2.5), json!(2.5));
    }
}

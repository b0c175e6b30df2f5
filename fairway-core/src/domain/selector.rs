//! Trigger selector evaluation
//!
//! A selector is a mapping from dotted payload path to expected string value.
//! All entries must match for the selector to match (logical AND); an empty
//! selector always matches; a path that does not exist in the payload never
//! matches.
//!
//! Evaluation is pure and deterministic: the dispatcher may re-evaluate the
//! same event during retry or recovery and must get the same verdict.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key/value match constraints of a trigger.
///
/// Typical selector: `{ "mytask.result": "fail" }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    #[serde(rename = "match", default)]
    pub matches: BTreeMap<String, String>,
}

impl Selector {
    /// Returns true when every constraint matches the payload.
    pub fn matches(&self, payload: &Value) -> bool {
        self.matches
            .iter()
            .all(|(path, expected)| match lookup(payload, path) {
                Some(actual) => value_equals(actual, expected),
                None => false,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Resolves a dotted path against a JSON value.
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Compares a JSON value against an expected string.
///
/// Strings compare directly; numbers and booleans compare against their
/// canonical JSON rendering so `"3"` matches `3`.
fn value_equals(actual: &Value, expected: &str) -> bool {
    match actual {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selector(pairs: &[(&str, &str)]) -> Selector {
        Selector {
            matches: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_empty_selector_always_matches() {
        let s = Selector::default();
        assert!(s.matches(&json!({})));
        assert!(s.matches(&json!({ "result": "fail" })));
    }

    #[test]
    fn test_top_level_match() {
        let s = selector(&[("result", "fail")]);
        assert!(s.matches(&json!({ "result": "fail" })));
        assert!(!s.matches(&json!({ "result": "pass" })));
    }

    #[test]
    fn test_nested_path_match() {
        let s = selector(&[("mytask.result", "fail")]);
        assert!(s.matches(&json!({ "mytask": { "result": "fail" } })));
        assert!(!s.matches(&json!({ "mytask": { "result": "pass" } })));
    }

    #[test]
    fn test_missing_path_never_matches() {
        let s = selector(&[("othertask.result", "fail")]);
        assert!(!s.matches(&json!({ "mytask": { "result": "fail" } })));
        assert!(!s.matches(&json!({})));
    }

    #[test]
    fn test_all_entries_must_match() {
        let s = selector(&[("result", "fail"), ("mytask.result", "fail")]);
        assert!(s.matches(&json!({
            "result": "fail",
            "mytask": { "result": "fail" }
        })));
        assert!(!s.matches(&json!({
            "result": "fail",
            "mytask": { "result": "pass" }
        })));
    }

    #[test]
    fn test_scalar_coercion() {
        let s = selector(&[("attempt", "3"), ("rollback", "true")]);
        assert!(s.matches(&json!({ "attempt": 3, "rollback": true })));
        assert!(!s.matches(&json!({ "attempt": 4, "rollback": true })));
    }

    #[test]
    fn test_objects_never_equal_strings() {
        let s = selector(&[("mytask", "fail")]);
        assert!(!s.matches(&json!({ "mytask": { "result": "fail" } })));
    }
}

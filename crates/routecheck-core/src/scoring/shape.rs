//! Response shape compliance.
//!
//! Fractional score: `(present required keys + matching equals pairs) /
//! (len(has_keys) + len(equals))`. Responses that are not JSON objects are
//! treated as empty objects, so every check fails instead of erroring.

use serde_json::{Map, Value};

use crate::domain::ResponseSpec;

/// Coerce a response into a JSON object.
///
/// Objects pass through; strings holding a JSON object are parsed; anything
/// else becomes the empty map.
pub fn coerce_mapping(actual: &Value) -> Map<String, Value> {
    match actual {
        Value::Object(obj) => obj.clone(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(obj)) => obj,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

/// Score `actual` against the structural part of `spec`.
///
/// An absent spec, or one without structural checks, scores 1.0 so it never
/// drags an aggregate down.
pub fn score_shape(actual: &Value, spec: Option<&ResponseSpec>) -> f64 {
    let spec = match spec {
        Some(spec) if !spec.has_no_shape_checks() => spec,
        _ => return 1.0,
    };

    let actual = coerce_mapping(actual);
    let total = spec.has_keys.len() + spec.equals.len();

    let present = spec
        .has_keys
        .iter()
        .filter(|k| actual.contains_key(k.as_str()))
        .count();
    let matching = spec
        .equals
        .iter()
        .filter(|(k, expected)| actual.get(k.as_str()) == Some(*expected))
        .count();

    (present + matching) as f64 / total as f64
}

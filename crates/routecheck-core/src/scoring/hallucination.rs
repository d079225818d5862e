//! Hallucination-risk heuristic.
//!
//! A response that admits uncertainty always passes. Otherwise a response
//! quoting three or more distinct numbers is treated as likely fabricated.
//! This is a proxy, not a semantic check; dates and ids trip it too.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::{Behavior, ResponseSpec};

/// Phrases that mark an answer as admitting it has no data.
pub const SAFE_MARKERS: &[&str] = &["暂无", "未找到", "没有相关", "不清楚", "不支持", "无法提供", "未知"];

/// Distinct numbers that, absent any safe marker, flag a response.
pub const NUMERIC_TOKEN_THRESHOLD: usize = 3;

fn digit_sequences() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Concatenate `message` and `snippets[].text`, if any are present.
fn message_text(obj: &Map<String, Value>) -> Option<String> {
    let mut texts = Vec::new();
    if let Some(message) = obj.get("message") {
        texts.push(value_text(message));
    }
    if let Some(Value::Array(snippets)) = obj.get("snippets") {
        texts.extend(
            snippets
                .iter()
                .filter_map(|s| s.as_object()?.get("text"))
                .map(value_text),
        );
    }
    (!texts.is_empty()).then(|| texts.join("\n"))
}

/// Reduce a response to the text the heuristic inspects.
///
/// Message-like fields win; otherwise objects fall back to their JSON
/// encoding and plain strings are used as is.
pub fn coerce_text(actual: &Value) -> String {
    match actual {
        Value::Null => String::new(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(obj)) => message_text(&obj).unwrap_or_else(|| raw.clone()),
            _ => raw.clone(),
        },
        Value::Object(obj) => message_text(obj).unwrap_or_else(|| actual.to_string()),
        other => other.to_string(),
    }
}

pub fn has_safe_marker(text: &str) -> bool {
    SAFE_MARKERS.iter().any(|m| text.contains(m))
}

/// Number of distinct digit sequences in `text`.
pub fn distinct_numeric_tokens(text: &str) -> usize {
    let Some(re) = digit_sequences() else {
        return 0;
    };
    re.find_iter(text)
        .map(|m| m.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

/// Score already-coerced text under `behavior`.
pub fn score_text(text: &str, behavior: Option<&Behavior>) -> f64 {
    if behavior != Some(&Behavior::ShouldNotHallucinate) {
        return 1.0;
    }
    if has_safe_marker(text) {
        return 1.0;
    }
    if distinct_numeric_tokens(text) >= NUMERIC_TOKEN_THRESHOLD {
        0.0
    } else {
        1.0
    }
}

/// Score a response against the behavior tag of `spec`.
pub fn score_hallucination(actual: &Value, spec: Option<&ResponseSpec>) -> f64 {
    let behavior = spec.and_then(|s| s.behavior.as_ref());
    if behavior.is_none() {
        return 1.0;
    }
    score_text(&coerce_text(actual), behavior)
}

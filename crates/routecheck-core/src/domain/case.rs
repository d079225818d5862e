//! Test batch records and the response expectations attached to them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether a test case is expected to route to its operation or away from it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseLabel {
    #[default]
    Positive,
    Negative,
}

/// One routing test case. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    /// Unique within a batch.
    pub id: String,
    pub query: String,
    #[serde(alias = "expected_api")]
    pub expected_operation: String,
    #[serde(default)]
    pub label: CaseLabel,
}

impl TestCase {
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        expected_operation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            expected_operation: expected_operation.into(),
            label: CaseLabel::Positive,
        }
    }

    pub fn with_label(mut self, label: CaseLabel) -> Self {
        self.label = label;
        self
    }
}

/// Expected behaviour tag for the hallucination check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Behavior {
    /// The response must not invent concrete facts.
    ShouldNotHallucinate,
    Normal,
    /// Any other tag; always passes.
    Other(String),
}

impl Behavior {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ShouldNotHallucinate => "should_not_hallucinate",
            Self::Normal => "normal",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for Behavior {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "should_not_hallucinate" => Self::ShouldNotHallucinate,
            "normal" => Self::Normal,
            _ => Self::Other(tag),
        }
    }
}

impl From<Behavior> for String {
    fn from(behavior: Behavior) -> Self {
        behavior.as_str().to_string()
    }
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expectations on the executed response of a test case.
///
/// Deserialization is lenient: wrong types are coerced to empty values rather
/// than rejected, so one malformed spec never aborts a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Value")]
pub struct ResponseSpec {
    /// Required top-level keys.
    pub has_keys: BTreeSet<String>,
    /// Key -> expected value pairs.
    pub equals: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior: Option<Behavior>,
}

impl ResponseSpec {
    /// Coerce an arbitrary JSON value into a spec.
    ///
    /// Strings are parsed as JSON first; anything that is not an object
    /// yields the empty spec.
    pub fn from_value(value: &Value) -> Self {
        let obj = match value {
            Value::Object(obj) => obj.clone(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(obj)) => obj,
                _ => return Self::default(),
            },
            _ => return Self::default(),
        };

        let has_keys = obj
            .get("has_keys")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let equals = obj
            .get("equals")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let behavior = obj
            .get("behavior")
            .and_then(Value::as_str)
            .filter(|tag| !tag.is_empty())
            .map(|tag| Behavior::from(tag.to_string()));

        Self {
            has_keys,
            equals,
            behavior,
        }
    }

    pub fn with_keys<const N: usize>(mut self, keys: [&str; N]) -> Self {
        self.has_keys.extend(keys.iter().map(|k| (*k).to_string()));
        self
    }

    pub fn with_equals(mut self, key: impl Into<String>, value: Value) -> Self {
        self.equals.insert(key.into(), value);
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Whether this response spec carries no structural checks.
    pub fn has_no_shape_checks(&self) -> bool {
        self.has_keys.is_empty() && self.equals.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.has_no_shape_checks() && self.behavior.is_none()
    }
}

impl From<Value> for ResponseSpec {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

//! Operation descriptors: the static vocabulary both classifiers route onto.

use serde::{Deserialize, Serialize};

/// Sentinel operation id meaning "no operation matched".
///
/// Negative test cases expect this id, and the evaluator treats a prediction
/// equal to it as "no route at all".
pub const UNRESOLVED_OPERATION: &str = "other";

/// Example utterances attached to an operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationExamples {
    /// Utterances that must route to this operation.
    #[serde(default)]
    pub positive: Vec<String>,

    /// Plausible utterances that must not route to this operation.
    #[serde(default)]
    pub negative: Vec<String>,
}

/// A single entry of the operation catalog.
///
/// Immutable once loaded; shared read-only by the classifiers and the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Path-like identifier, e.g. `/hr/leave/balance`.
    #[serde(alias = "api")]
    pub id: String,

    /// Natural-language description of what the operation does.
    pub purpose: String,

    /// Declared parameter names, in order.
    #[serde(default)]
    pub params: Vec<String>,

    #[serde(default)]
    pub examples: OperationExamples,
}

impl OperationDescriptor {
    pub fn new(id: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            purpose: purpose.into(),
            params: Vec::new(),
            examples: OperationExamples::default(),
        }
    }

    pub fn with_params<const N: usize>(mut self, params: [&str; N]) -> Self {
        self.params = params.iter().map(|p| (*p).to_string()).collect();
        self
    }

    pub fn with_positive(mut self, utterance: impl Into<String>) -> Self {
        self.examples.positive.push(utterance.into());
        self
    }

    pub fn with_negative(mut self, utterance: impl Into<String>) -> Self {
        self.examples.negative.push(utterance.into());
        self
    }
}

/// Whether `id` is the explicit "no match" sentinel or blank.
pub fn is_unresolved(id: &str) -> bool {
    let id = id.trim();
    id.is_empty() || id == UNRESOLVED_OPERATION
}

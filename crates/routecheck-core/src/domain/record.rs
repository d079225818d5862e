//! Per-case evaluation records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Score reported for an optional metric that did not apply to a case.
pub const NOT_EVALUATED: f64 = -1.0;

/// Metric name for the routing accuracy score.
pub const ROUTING_ACCURACY: &str = "routing_accuracy";
/// Metric name for the response shape compliance score.
pub const RESPONSE_SHAPE: &str = "response_shape";
/// Metric name for the hallucination risk score.
pub const HALLUCINATION: &str = "hallucination";

/// Outcome of one test case in one run. The unit of the batch report.
///
/// `pass` reflects the routing comparison only; the other scores are advisory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalRecord {
    pub case_id: String,
    pub pass: bool,
    pub scores: BTreeMap<String, f64>,
    pub reason: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub predicted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Set when the classifier itself failed, so `predicted` is meaningless.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub classification_failed: bool,
    /// Backend response, or the error marker, when the case was executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl EvalRecord {
    /// A failed record carrying `reason`, with every metric at its failure value.
    pub fn failed(case_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut scores = BTreeMap::new();
        scores.insert(ROUTING_ACCURACY.to_string(), 0.0);
        scores.insert(RESPONSE_SHAPE.to_string(), NOT_EVALUATED);
        scores.insert(HALLUCINATION.to_string(), NOT_EVALUATED);
        Self {
            case_id: case_id.into(),
            pass: false,
            scores,
            reason: reason.into(),
            query: String::new(),
            expected: String::new(),
            predicted: String::new(),
            latency_ms: None,
            classification_failed: false,
            response: None,
        }
    }

    pub fn score(&self, metric: &str) -> Option<f64> {
        self.scores.get(metric).copied()
    }

    /// The score for `metric` if it was actually evaluated.
    pub fn evaluated_score(&self, metric: &str) -> Option<f64> {
        self.score(metric).filter(|s| *s >= 0.0)
    }

    pub fn set_score(&mut self, metric: &str, value: f64) {
        self.scores.insert(metric.to_string(), value);
    }
}

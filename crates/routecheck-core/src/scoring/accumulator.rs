//! Per-run aggregation of metric scores.

use serde::{Deserialize, Serialize};

use super::routing::RoutingAccuracy;
use crate::domain::{EvalRecord, HALLUCINATION, RESPONSE_SHAPE, ROUTING_ACCURACY};

/// Whether a single score counts as a pass for any metric.
pub fn is_successful(score: f64) -> bool {
    score >= 1.0
}

/// Mean and pass rate of an optional metric over the cases it scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanScore {
    pub scored: usize,
    pub passed: usize,
    pub sum: f64,
}

impl MeanScore {
    /// Fold in a score. Negative scores mark "not evaluated" and are skipped.
    pub fn record(&mut self, score: f64) {
        if score < 0.0 {
            return;
        }
        self.scored += 1;
        self.sum += score;
        if is_successful(score) {
            self.passed += 1;
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.sum / self.scored as f64)
    }

    pub fn pass_rate(&self) -> Option<f64> {
        (self.scored > 0).then(|| self.passed as f64 / self.scored as f64)
    }
}

/// All three metric aggregates for one run.
///
/// Created per run and discarded after; scorers themselves hold no state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAccumulator {
    pub routing: RoutingAccuracy,
    pub shape: MeanScore,
    pub hallucination: MeanScore,
}

impl RunAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &EvalRecord) {
        self.routing
            .record(record.score(ROUTING_ACCURACY).unwrap_or(0.0));
        if let Some(score) = record.evaluated_score(RESPONSE_SHAPE) {
            self.shape.record(score);
        }
        if let Some(score) = record.evaluated_score(HALLUCINATION) {
            self.hallucination.record(score);
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EvalRecord>) -> Self {
        let mut acc = Self::new();
        for record in records {
            acc.record(record);
        }
        acc
    }
}

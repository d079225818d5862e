//! Routing accuracy: did the classifier pick the expected operation?

use serde::{Deserialize, Serialize};

/// 1.0 on exact string match, else 0.0.
pub fn score_routing(actual: &str, expected: &str) -> f64 {
    if actual == expected {
        1.0
    } else {
        0.0
    }
}

/// Running count of routing invocations and successes across a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingAccuracy {
    pub total: usize,
    pub correct: usize,
}

impl RoutingAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one pair and fold it into the running totals.
    pub fn measure(&mut self, actual: &str, expected: &str) -> f64 {
        let score = score_routing(actual, expected);
        self.record(score);
        score
    }

    pub fn record(&mut self, score: f64) {
        self.total += 1;
        if score >= 1.0 {
            self.correct += 1;
        }
    }

    /// Aggregate pass rate; `None` until at least one invocation.
    pub fn pass_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64)
        }
    }
}

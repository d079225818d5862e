//! Quality gate over a batch summary.
//!
//! Checks a [`BatchSummary`] against a [`GateRuleSet`] and produces a
//! [`GateVerdict`]. A rule whose metric was not scored for any case is
//! skipped rather than failed.

use serde::{Deserialize, Serialize};

use crate::report::BatchSummary;

// ---------------------------------------------------------------------------
// Thresholds and rules
// ---------------------------------------------------------------------------

/// Minimum values a batch must reach. All rates are fractions in `0.0..=1.0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateThresholds {
    pub min_accuracy: f64,
    pub min_shape_compliance: f64,
    pub min_hallucination_pass_rate: f64,
    /// Stop at the first violation.
    pub fail_fast: bool,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_accuracy: 0.9,
            min_shape_compliance: 0.8,
            min_hallucination_pass_rate: 0.9,
            fail_fast: false,
        }
    }
}

/// A single rule a batch must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateRule {
    /// Routing pass rate must meet `GateThresholds::min_accuracy`.
    MinAccuracy,
    /// Mean shape compliance must meet `GateThresholds::min_shape_compliance`.
    MinShapeCompliance,
    /// Hallucination pass rate must meet `GateThresholds::min_hallucination_pass_rate`.
    MinHallucinationPassRate,
}

/// A set of gate rules plus the thresholds they reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateRuleSet {
    pub thresholds: GateThresholds,
    pub rules: Vec<GateRule>,
}

impl GateRuleSet {
    /// Default thresholds with routing accuracy as the only rule.
    pub fn standard() -> Self {
        Self {
            thresholds: GateThresholds::default(),
            rules: vec![GateRule::MinAccuracy],
        }
    }

    /// Add a rule unless it is already present.
    pub fn with_rule(mut self, rule: GateRule) -> Self {
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
        self
    }

    /// Replace the thresholds.
    pub fn with_thresholds(mut self, thresholds: GateThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// A single rule violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub rule: GateRule,
    pub reason: String,
}

/// The outcome of checking a batch summary against a rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    pub violations: Vec<Violation>,
    /// Rules with nothing to measure.
    #[serde(default)]
    pub skipped: Vec<GateRule>,
}

impl GateVerdict {
    /// True when no rule was violated. Skipped rules do not count.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate a [`BatchSummary`] against a [`GateRuleSet`], returning a [`GateVerdict`].
///
/// When `thresholds.fail_fast` is true, evaluation stops at the first violation.
pub fn evaluate_gate(rule_set: &GateRuleSet, summary: &BatchSummary) -> GateVerdict {
    let mut verdict = GateVerdict {
        violations: Vec::new(),
        skipped: Vec::new(),
    };

    for rule in &rule_set.rules {
        match check_rule(rule, &rule_set.thresholds, summary) {
            RuleOutcome::Skipped => verdict.skipped.push(rule.clone()),
            RuleOutcome::Met => {}
            RuleOutcome::Violated(v) => {
                verdict.violations.push(v);
                if rule_set.thresholds.fail_fast {
                    break;
                }
            }
        }
    }
    verdict
}

enum RuleOutcome {
    Met,
    Skipped,
    Violated(Violation),
}

fn at_least(rule: &GateRule, label: &str, actual: Option<f64>, required: f64) -> RuleOutcome {
    match actual {
        None => RuleOutcome::Skipped,
        Some(value) if value < required => RuleOutcome::Violated(Violation {
            rule: rule.clone(),
            reason: format!(
                "{} {:.2}% < required {:.2}%",
                label,
                value * 100.0,
                required * 100.0
            ),
        }),
        Some(_) => RuleOutcome::Met,
    }
}

fn check_rule(rule: &GateRule, thresholds: &GateThresholds, summary: &BatchSummary) -> RuleOutcome {
    match rule {
        GateRule::MinAccuracy => at_least(
            rule,
            "routing accuracy",
            summary.accuracy(),
            thresholds.min_accuracy,
        ),
        GateRule::MinShapeCompliance => at_least(
            rule,
            "shape compliance",
            summary.mean_shape_compliance,
            thresholds.min_shape_compliance,
        ),
        GateRule::MinHallucinationPassRate => at_least(
            rule,
            "hallucination pass rate",
            summary.hallucination_pass_rate,
            thresholds.min_hallucination_pass_rate,
        ),
    }
}

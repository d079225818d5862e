//! Structured lifecycle events for a routecheck batch.
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it. Per-case work is instrumented with [`case_span`].

use tracing::{info, warn, Span};

/// Span tagging everything logged while a case is in flight.
///
/// Attach with `tracing::Instrument` rather than entering it, since cases
/// run concurrently on one task.
pub fn case_span(case_id: &str) -> Span {
    tracing::info_span!("routecheck.case", case_id = %case_id)
}

pub fn emit_batch_started(batch_id: &str, classifier: &str, total_cases: usize) {
    info!(
        event = "batch.started",
        batch_id = %batch_id,
        classifier = %classifier,
        total_cases = total_cases,
    );
}

pub fn emit_case_routed(case_id: &str, operation: &str, reason: &str) {
    info!(event = "case.routed", case_id = %case_id, operation = %operation, reason = %reason);
}

pub fn emit_case_executed(case_id: &str, operation: &str, latency_ms: f64, error: bool) {
    info!(
        event = "case.executed",
        case_id = %case_id,
        operation = %operation,
        latency_ms = latency_ms,
        error = error,
    );
}

pub fn emit_case_finished(case_id: &str, pass: bool) {
    info!(event = "case.finished", case_id = %case_id, pass = pass);
}

/// Emit event: batch finished with duration and pass counts.
pub fn emit_batch_finished(batch_id: &str, duration_ms: u64, total: usize, passed: usize) {
    info!(
        event = "batch.finished",
        batch_id = %batch_id,
        duration_ms = duration_ms,
        total = total,
        passed = passed,
    );
}

pub fn emit_gate_evaluated(batch_id: &str, accuracy: f64, passed: bool) {
    info!(event = "gate.evaluated", batch_id = %batch_id, accuracy = accuracy, passed = passed);
}

/// Warning: the classifier failed for one case; the batch continues.
pub fn emit_case_classify_error(case_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "case.classify_error", case_id = %case_id, error = %error);
}

/// Warning: a trace sink call failed and was dropped.
pub fn emit_trace_sink_error(operation: &str, error: &dyn std::fmt::Display) {
    warn!(event = "trace.sink_error", operation = %operation, error = %error);
}

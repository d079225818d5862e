//! Global atomic counters for routecheck observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    completion_calls: AtomicU64,
    completion_failures: AtomicU64,
    backend_calls: AtomicU64,
    backend_failures: AtomicU64,
    trace_sink_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            completion_calls: AtomicU64::new(0),
            completion_failures: AtomicU64::new(0),
            backend_calls: AtomicU64::new(0),
            backend_failures: AtomicU64::new(0),
            trace_sink_failures: AtomicU64::new(0),
        }
    }

    /// Increment the completion-calls counter by one.
    pub fn inc_completion_calls(&self) {
        self.completion_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "completion_calls", "counter incremented");
    }

    /// Increment the completion-failures counter by one.
    pub fn inc_completion_failures(&self) {
        self.completion_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "completion_failures", "counter incremented");
    }

    /// Increment the backend-calls counter by one.
    pub fn inc_backend_calls(&self) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "backend_calls", "counter incremented");
    }

    /// Increment the backend-failures counter by one.
    pub fn inc_backend_failures(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "backend_failures", "counter incremented");
    }

    /// Increment the trace-sink-failures counter by one.
    pub fn inc_trace_sink_failures(&self) {
        self.trace_sink_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trace_sink_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a batch) rather than on every
    /// increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            completion_calls = self.completion_calls(),
            completion_failures = self.completion_failures(),
            backend_calls = self.backend_calls(),
            backend_failures = self.backend_failures(),
            trace_sink_failures = self.trace_sink_failures(),
        );
    }

    /// Read the current completion-calls count.
    pub fn completion_calls(&self) -> u64 {
        self.completion_calls.load(Ordering::Relaxed)
    }

    /// Read the current completion-failures count.
    pub fn completion_failures(&self) -> u64 {
        self.completion_failures.load(Ordering::Relaxed)
    }

    /// Read the current backend-calls count.
    pub fn backend_calls(&self) -> u64 {
        self.backend_calls.load(Ordering::Relaxed)
    }

    /// Read the current backend-failures count.
    pub fn backend_failures(&self) -> u64 {
        self.backend_failures.load(Ordering::Relaxed)
    }

    /// Read the current trace-sink-failures count.
    pub fn trace_sink_failures(&self) -> u64 {
        self.trace_sink_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.completion_calls.store(0, Ordering::Relaxed);
        self.completion_failures.store(0, Ordering::Relaxed);
        self.backend_calls.store(0, Ordering::Relaxed);
        self.backend_failures.store(0, Ordering::Relaxed);
        self.trace_sink_failures.store(0, Ordering::Relaxed);
    }
}

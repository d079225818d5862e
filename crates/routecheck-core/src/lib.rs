//! routecheck core library.
//!
//! Routes free-form HR queries to catalog operations, executes them against a
//! backend and scores each case for routing accuracy, response shape and
//! hallucination risk.

pub mod catalog;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod driver;
pub mod evaluator;
pub mod gate;
pub mod gateway;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod scoring;
pub mod telemetry;
pub mod trace_sink;

#[cfg(test)]
mod test_support;

pub use catalog::{display_name, OperationCatalog, UNKNOWN_DISPLAY_NAME};
pub use classifier::{Classifier, ModelClassifier, RuleClassifier};
pub use completion::{
    service_from_config, CompletionConfig, CompletionError, CompletionService,
    HttpCompletionClient, Prompt, UnconfiguredService,
};
pub use config::HarnessConfig;
pub use dataset::{
    expand_with_model, load_cases, load_specs, parse_cases, parse_specs, save_cases,
};
pub use domain::{
    Behavior, CaseLabel, EvalRecord, ExecutionTrace, OperationDescriptor, ResponseSpec, Result,
    RouteCheckError, RoutePlan, TestCase, UserTurn, NOT_EVALUATED, UNRESOLVED_OPERATION,
};
pub use driver::{RunConfig, RunDriver, RunOutcome};
pub use evaluator::Evaluator;
pub use gate::{evaluate_gate, GateRule, GateRuleSet, GateThresholds, GateVerdict, Violation};
pub use gateway::{
    BackendConfig, BackendError, Execution, ExecutionGateway, HttpBackend, OperationBackend,
};
pub use report::{
    render_summary_md, write_report_dir, write_report_json, write_summary_md, BatchReport,
    BatchSummary, FailureCategory, FailureEntry,
};
pub use scoring::{score_hallucination, score_routing, score_shape, RunAccumulator};
pub use trace_sink::{TraceConfig, TraceSink, Tracer};

pub use metrics::METRICS;
pub use obs::emit_gate_evaluated;
pub use telemetry::{init_tracing, level_for_verbosity};

/// routecheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Domain models for routecheck.
//!
//! Canonical definitions for the core entities:
//! - `OperationDescriptor`: one routable backend operation
//! - `UserTurn` / `RoutePlan` / `ExecutionTrace`: one request through the pipeline
//! - `TestCase` / `ResponseSpec`: the batch under evaluation
//! - `EvalRecord`: the per-case outcome

pub mod case;
pub mod error;
pub mod operation;
pub mod record;
pub mod turn;

pub use case::{Behavior, CaseLabel, ResponseSpec, TestCase};
pub use error::{truncate_message, Result, RouteCheckError};
pub use operation::{is_unresolved, OperationDescriptor, OperationExamples, UNRESOLVED_OPERATION};
pub use record::{EvalRecord, HALLUCINATION, NOT_EVALUATED, RESPONSE_SHAPE, ROUTING_ACCURACY};
pub use turn::{
    error_response, is_error_response, ExecutionTrace, RoutePlan, UserTurn, ERROR_MARKER_KEY,
};

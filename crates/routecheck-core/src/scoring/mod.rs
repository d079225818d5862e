//! Metric engine.
//!
//! Three stateless scorers, each mapping (actual output, expectation) to a
//! score in `[0, 1]`:
//! - [`routing`]: exact operation-id match
//! - [`shape`]: required keys and equal values in a JSON response
//! - [`hallucination`]: uncertainty-marker / numeric-token heuristic
//!
//! Batch totals live in an explicit [`RunAccumulator`] owned by the caller.

pub mod accumulator;
pub mod hallucination;
pub mod routing;
pub mod shape;

pub use accumulator::{is_successful, MeanScore, RunAccumulator};
pub use hallucination::{
    coerce_text, distinct_numeric_tokens, has_safe_marker, score_hallucination, score_text,
    NUMERIC_TOKEN_THRESHOLD, SAFE_MARKERS,
};
pub use routing::{score_routing, RoutingAccuracy};
pub use shape::{coerce_mapping, score_shape};

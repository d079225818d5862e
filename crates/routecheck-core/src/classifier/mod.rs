//! Query classifiers.
//!
//! - [`rules`]: deterministic keyword cascade (`RuleClassifier`)
//! - [`model`]: completion-service backed classifier (`ModelClassifier`)
//!
//! Both implement [`Classifier`] so the run driver can swap them freely.

use async_trait::async_trait;

use crate::completion::CompletionError;
use crate::domain::{RoutePlan, UserTurn};

pub mod model;
pub mod rules;

pub use model::{build_prompt, parse_operation, ModelClassifier, DEFAULT_COOLDOWN};
pub use rules::{normalize, CategoryRule, RuleClassifier, RuleMatch, SubRule, DEFAULT_OPERATION, HR_CASCADE};

/// Produces a [`RoutePlan`] for a user turn.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short name used in reports (`rule`, `model`).
    fn name(&self) -> &str;

    async fn route(&self, turn: &UserTurn) -> Result<RoutePlan, CompletionError>;
}

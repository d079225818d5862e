//! Model-assisted classifier.
//!
//! Prompts the completion service with the whole catalog and the query, and
//! reads a single operation id back out of the free-text reply. The extracted
//! id is not validated against the catalog; callers treat any string as
//! possibly unknown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::Classifier;
use crate::catalog::OperationCatalog;
use crate::completion::{CompletionError, CompletionService, Prompt};
use crate::domain::{truncate_message, RoutePlan, UserTurn};

/// Default pause after every completion call; the upstream service enforces
/// a per-caller request-rate ceiling.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(20);

const SYSTEM_PROMPT: &str = "你是一个精确的 API 分类助手。";

/// Characters stripped from both ends of the extracted token.
const TRIM_CHARS: &[char] = &[
    '`', '\'', '"', '，', '。', ',', '.', ':', '：', ';', '；', '“', '”', '‘', '’', '(', ')',
    '（', '）', '[', ']', '【', '】',
];

/// Build the routing prompt listing every operation id and purpose.
pub fn build_prompt(catalog: &OperationCatalog, query: &str) -> Prompt {
    let options = catalog
        .iter()
        .map(|op| format!("{}：{}", op.id, op.purpose))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "你是一个 HR 系统的 API 路由规划器。\n\
         可用的 API 及其功能如下：\n\
         {options}\n\n\
         请为下面的用户问题选择最合适的 API 路径，只输出路径本身，不要解释。\n\n\
         用户问题：\n\
         “{query}”\n\n\
         输出示例：\n\
         /hr/leave/balance\n"
    );

    Prompt::new(SYSTEM_PROMPT, user).with_temperature(0.0)
}

/// Extract the operation id from a model reply.
///
/// Takes the first whitespace-delimited token and strips surrounding quote
/// and punctuation characters. An empty reply yields an empty id.
pub fn parse_operation(reply: &str) -> String {
    reply
        .split_whitespace()
        .next()
        .map(|token| token.trim_matches(TRIM_CHARS).to_string())
        .unwrap_or_default()
}

/// Classifier backed by an external completion service.
pub struct ModelClassifier {
    service: Arc<dyn CompletionService>,
    catalog: Arc<OperationCatalog>,
    cooldown: Duration,
    throttle: Mutex<()>,
}

impl ModelClassifier {
    pub fn new(service: Arc<dyn CompletionService>, catalog: Arc<OperationCatalog>) -> Self {
        Self {
            service,
            catalog,
            cooldown: DEFAULT_COOLDOWN,
            throttle: Mutex::new(()),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Classify a query. Service errors propagate; they are never mapped to a
    /// default route.
    ///
    /// Calls are serialized and each is followed by the cooldown, whether it
    /// succeeded or not.
    pub async fn classify(&self, query: &str) -> Result<String, CompletionError> {
        let prompt = build_prompt(&self.catalog, query);

        let _slot = self.throttle.lock().await;
        let result = self.service.complete(&prompt).await;
        if !self.cooldown.is_zero() {
            debug!(cooldown_ms = self.cooldown.as_millis() as u64, "classifier cooldown");
            tokio::time::sleep(self.cooldown).await;
        }

        let reply = result?;
        Ok(parse_operation(&reply))
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    fn name(&self) -> &str {
        "model"
    }

    async fn route(&self, turn: &UserTurn) -> Result<RoutePlan, CompletionError> {
        let operation = self.classify(&turn.query).await?;
        let reason = format!("model reply: {}", truncate_message(&operation, 80));
        Ok(RoutePlan::new(operation, reason))
    }
}

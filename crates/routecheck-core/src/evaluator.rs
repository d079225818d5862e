//! Per-case evaluator.
//!
//! Compares the predicted operation with the expected one and, on a
//! mismatch, explains the miss with the cheapest applicable tier:
//!
//! 1. nothing predicted: template naming the expected operation
//! 2. near miss (id similarity above [`SIMILARITY_THRESHOLD`]): template
//!    citing both operations and the score
//! 3. otherwise: a one-sentence diagnosis from the completion service,
//!    falling back to a template when the service fails
//!
//! `evaluate` never fails. Internal faults become a failed record.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::catalog::display_name;
use crate::completion::{CompletionError, CompletionService, Prompt};
use crate::domain::{is_unresolved, truncate_message, EvalRecord, TestCase, ROUTING_ACCURACY};
use crate::scoring::score_routing;

/// Similarity above which a mismatch is reported as a near miss.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Deadline for one explanation request.
pub const EXPLANATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters of the service error kept in a fallback explanation.
const FALLBACK_ERROR_CHARS: usize = 100;

const EXPLAIN_SYSTEM_PROMPT: &str = "你是一个精确、简洁的错误分析助手。";

/// Normalized similarity of two operation ids in `[0, 1]`.
///
/// Plain Jaro: every id shares the `/hr/` prefix, so a prefix bonus would
/// lift unrelated categories over the threshold.
pub fn id_similarity(expected: &str, predicted: &str) -> f64 {
    strsim::jaro(expected, predicted)
}

pub struct Evaluator {
    service: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl Evaluator {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            service,
            timeout: EXPLANATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluate one case against the predicted operation id.
    pub async fn evaluate(&self, case: &TestCase, predicted: &str) -> EvalRecord {
        match AssertUnwindSafe(self.compare(case, predicted))
            .catch_unwind()
            .await
        {
            Ok(record) => record,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(case_id = %case.id, error = %message, "evaluation fault");
                let mut record = EvalRecord::failed(&case.id, format!("评估过程出错: {message}"));
                record.query = case.query.clone();
                record.expected = case.expected_operation.trim().to_string();
                record.predicted = predicted.trim().to_string();
                record
            }
        }
    }

    async fn compare(&self, case: &TestCase, predicted: &str) -> EvalRecord {
        let expected = case.expected_operation.trim();
        let predicted = predicted.trim();

        let routing = score_routing(predicted, expected);
        let pass = routing >= 1.0;
        let reason = if pass {
            String::new()
        } else {
            self.explain(&case.query, expected, predicted).await
        };

        let mut record = EvalRecord::failed(&case.id, reason);
        record.pass = pass;
        record.set_score(ROUTING_ACCURACY, routing);
        record.query = case.query.clone();
        record.expected = expected.to_string();
        record.predicted = predicted.to_string();
        record
    }

    /// Explain a routing mismatch. Inputs are already trimmed.
    pub async fn explain(&self, query: &str, expected: &str, predicted: &str) -> String {
        if is_unresolved(predicted) {
            return format!("应是【{}】，但未匹配到任何操作。", display_name(expected));
        }

        let similarity = id_similarity(expected, predicted);
        if similarity > SIMILARITY_THRESHOLD {
            return format!(
                "应是【{}】，实际识别为【{}】，路径高度相似（{:.2}），可能是路由细节混淆。",
                display_name(expected),
                display_name(predicted),
                similarity
            );
        }

        let prompt = explanation_prompt(query, expected, predicted).with_timeout(self.timeout);
        let reply = match tokio::time::timeout(self.timeout, self.service.complete(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.timeout.as_secs())),
        };

        match reply.map(|r| r.trim().to_string()) {
            Ok(reason) if !reason.is_empty() => reason,
            Ok(_) => fallback_explanation(expected, predicted, &CompletionError::EmptyResponse),
            Err(err) => {
                debug!(error = %err, "explanation request failed");
                fallback_explanation(expected, predicted, &err)
            }
        }
    }
}

fn explanation_prompt(query: &str, expected: &str, predicted: &str) -> Prompt {
    let user = format!(
        "你是一个智能评估助手。\n\
         我将给你一个用户的输入问题、一条预期的操作路径、以及模型预测的操作路径。\n\
         请简短说明预测错误的原因（比如“将假期余额问题误识别为政策查询”）。\n\n\
         用户输入：{query}\n\
         预期操作：{expected}（{}）\n\
         实际预测：{predicted}（{}）\n\n\
         请用一句中文描述错误原因。",
        display_name(expected),
        display_name(predicted),
    );
    Prompt::new(EXPLAIN_SYSTEM_PROMPT, user).with_temperature(0.3)
}

fn fallback_explanation(expected: &str, predicted: &str, err: &CompletionError) -> String {
    format!(
        "应是【{}】，实际识别为【{}】，请检查路由逻辑。（解释服务失败：{}）",
        display_name(expected),
        display_name(predicted),
        truncate_message(&err.to_string(), FALLBACK_ERROR_CHARS)
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

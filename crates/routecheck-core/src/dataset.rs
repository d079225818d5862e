//! Test batch and response-spec I/O, plus model-assisted batch expansion.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{unique_case_id, OperationCatalog};
use crate::completion::{CompletionService, Prompt};
use crate::domain::{
    truncate_message, CaseLabel, OperationDescriptor, ResponseSpec, Result, RouteCheckError,
    TestCase, UNRESOLVED_OPERATION,
};

/// Reject a batch in which two cases share an id.
pub fn ensure_unique_ids(cases: &[TestCase]) -> Result<()> {
    let mut seen = HashSet::new();
    for case in cases {
        if !seen.insert(case.id.as_str()) {
            return Err(RouteCheckError::DuplicateCaseId(case.id.clone()));
        }
    }
    Ok(())
}

/// Parse a JSON array of test cases.
pub fn parse_cases(raw: &str) -> Result<Vec<TestCase>> {
    let cases: Vec<TestCase> = serde_json::from_str(raw)?;
    ensure_unique_ids(&cases)?;
    Ok(cases)
}

pub fn load_cases(path: &Path) -> Result<Vec<TestCase>> {
    let raw = std::fs::read_to_string(path)?;
    let cases = parse_cases(&raw)?;
    info!(path = %path.display(), cases = cases.len(), "loaded test batch");
    Ok(cases)
}

pub fn save_cases(path: &Path, cases: &[TestCase]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cases)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Parse `[{"id": ..., "spec": {...}}, ...]` into a map keyed by case id.
///
/// Entries without a string id are skipped; malformed specs become empty.
pub fn parse_specs(raw: &str) -> Result<HashMap<String, ResponseSpec>> {
    let value: Value = serde_json::from_str(raw)?;
    let entries = value.as_array().ok_or_else(|| {
        RouteCheckError::InvalidBatch("response specs must be a JSON array".to_string())
    })?;

    let mut specs = HashMap::new();
    for entry in entries {
        let Some(id) = entry.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
            continue;
        };
        let spec = entry
            .get("spec")
            .map(ResponseSpec::from_value)
            .unwrap_or_default();
        specs.insert(id.to_string(), spec);
    }
    Ok(specs)
}

pub fn load_specs(path: &Path) -> Result<HashMap<String, ResponseSpec>> {
    let raw = std::fs::read_to_string(path)?;
    let specs = parse_specs(&raw)?;
    info!(path = %path.display(), specs = specs.len(), "loaded response specs");
    Ok(specs)
}

/// Utterances proposed by the model for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedExamples {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

const EXPANSION_SYSTEM_PROMPT: &str = "你是一个严谨的数据生成助手，只输出符合要求的 JSON。";

fn expansion_prompt(op: &OperationDescriptor, positive: usize, negative: usize) -> Prompt {
    let existing_positive =
        serde_json::to_string_pretty(&op.examples.positive).unwrap_or_else(|_| "[]".to_string());
    let existing_negative =
        serde_json::to_string_pretty(&op.examples.negative).unwrap_or_else(|_| "[]".to_string());

    let user = format!(
        "你现在在帮我为一个 HR 操作路由器生成中文查询示例，用于评测“查询 → 操作”的映射。\n\n\
         操作信息：\n\
         - 路径: {id}\n\
         - 功能描述: {purpose}\n\
         - 参数: {params}\n\n\
         已有的 positive 示例（应该路由到这个操作）：\n{existing_positive}\n\n\
         已有的 negative 示例（不应该路由到这个操作）：\n{existing_negative}\n\n\
         请你：\n\
         1. 生成 {positive} 条新的 positive 查询，说法多样，但都应该路由到同一个操作。\n\
         2. 生成 {negative} 条新的 negative 查询，看起来合理，但属于其他操作或无法确定路由。\n\
         3. 只输出有效 JSON，格式如下：\n\
         {{\"positive\": [\"...\"], \"negative\": [\"...\"]}}\n",
        id = op.id,
        purpose = op.purpose,
        params = op.params.join(", "),
    );
    Prompt::new(EXPANSION_SYSTEM_PROMPT, user).with_temperature(0.7)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a `{"positive": [...], "negative": [...]}` reply.
///
/// Tolerates surrounding prose or code fences by reading from the first `{`
/// to the last `}`.
pub fn parse_generated(reply: &str) -> Option<GeneratedExamples> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let obj = value.as_object()?;
    Some(GeneratedExamples {
        positive: string_list(obj.get("positive")),
        negative: string_list(obj.get("negative")),
    })
}

/// Ask the model for new utterances for every catalog operation.
///
/// Failed or unparseable replies are logged and contribute no cases.
pub async fn expand_with_model(
    service: &dyn CompletionService,
    catalog: &OperationCatalog,
    positive: usize,
    negative: usize,
) -> Vec<TestCase> {
    let mut ids = HashSet::new();
    let mut cases = Vec::new();

    for op in catalog.iter() {
        let prompt = expansion_prompt(op, positive, negative);
        let reply = match service.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(operation = %op.id, error = %err, "expansion request failed; skipping");
                continue;
            }
        };
        let Some(generated) = parse_generated(&reply) else {
            warn!(
                operation = %op.id,
                reply = %truncate_message(&reply, 200),
                "expansion reply is not valid JSON; skipping"
            );
            continue;
        };

        info!(
            operation = %op.id,
            positive = generated.positive.len(),
            negative = generated.negative.len(),
            "generated examples"
        );
        for query in generated.positive {
            cases.push(
                TestCase::new(unique_case_id(&mut ids), query, op.id.clone())
                    .with_label(CaseLabel::Positive),
            );
        }
        for query in generated.negative {
            cases.push(
                TestCase::new(unique_case_id(&mut ids), query, UNRESOLVED_OPERATION)
                    .with_label(CaseLabel::Negative),
            );
        }
    }

    cases
}

//! End-to-end batch runs with in-process backend, explainer and trace sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use routecheck_core::classifier::ModelClassifier;
use routecheck_core::domain::{HALLUCINATION, RESPONSE_SHAPE, ROUTING_ACCURACY};
use routecheck_core::trace_sink::MemoryTraceSink;
use routecheck_core::{
    evaluate_gate, render_summary_md, write_report_dir, BackendError, BatchReport, Behavior,
    CompletionError, CompletionService, Evaluator, ExecutionGateway, FailureCategory, GateRule,
    GateRuleSet, OperationBackend, OperationCatalog, Prompt, ResponseSpec, RuleClassifier,
    RunConfig, RunDriver, TestCase, Tracer, NOT_EVALUATED,
};

struct Explainer {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionService for Explainer {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("将政策类问题误判为其他操作。".to_string())
    }
}

/// Answers from a fixed table keyed by operation.
struct HrBackend;

#[async_trait]
impl OperationBackend for HrBackend {
    async fn call(&self, operation: &str, _params: &Map<String, Value>) -> Result<Value, BackendError> {
        match operation {
            "/hr/leave/balance" => Ok(json!({"employee_id": "E12345", "annual_leave_remaining": 7})),
            "/hr/policy" => Ok(json!({
                "message": "婚假 10 天，需提前 3 天申请，最长 15 天",
                "snippets": []
            })),
            "/hr/payroll/tax" => Ok(json!({"message": "暂无本月个税数据"})),
            other => Err(BackendError::Status {
                status: 404,
                body: format!("no handler for {other}"),
            }),
        }
    }
}

fn specs() -> HashMap<String, ResponseSpec> {
    HashMap::from([
        (
            "balance".to_string(),
            ResponseSpec::default()
                .with_keys(["employee_id", "annual_leave_remaining"])
                .with_equals("employee_id", json!("E12345")),
        ),
        (
            "tax".to_string(),
            ResponseSpec::default().with_behavior(Behavior::ShouldNotHallucinate),
        ),
    ])
}

fn batch() -> Vec<TestCase> {
    vec![
        TestCase::new("balance", "我的年假还有几天", "/hr/leave/balance"),
        TestCase::new("policy", "婚假政策是怎样的", "/hr/policy"),
        TestCase::new("tax", "个税扣了多少", "/hr/payroll/tax"),
        TestCase::new("miss", "公司年会几号", "/hr/attendance/checkin"),
        TestCase::new("contract", "帮我查下我的合同续签", "/hr/contract/renew"),
    ]
}

fn driver(explainer: Arc<Explainer>, sink: Arc<MemoryTraceSink>) -> RunDriver {
    let catalog = Arc::new(OperationCatalog::builtin().expect("catalog"));
    RunDriver::new(catalog, Arc::new(RuleClassifier::default()), Evaluator::new(explainer))
        .with_gateway(ExecutionGateway::new(Arc::new(HrBackend), Tracer::new(sink)))
}

#[tokio::test]
async fn full_batch_scores_every_metric() {
    let explainer = Arc::new(Explainer {
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(MemoryTraceSink::new());
    let cases = batch();
    let outcome = driver(explainer.clone(), sink.clone())
        .run(&cases, &specs())
        .await
        .expect("run");

    let ids: Vec<&str> = outcome.records.iter().map(|r| r.case_id.as_str()).collect();
    assert_eq!(ids, ["balance", "policy", "tax", "miss", "contract"]);
    assert_eq!(outcome.passed(), 3);
    assert_eq!(outcome.classifier, "rule");

    let by_id = |id: &str| {
        outcome
            .records
            .iter()
            .find(|r| r.case_id == id)
            .expect("record")
    };

    let balance = by_id("balance");
    assert!(balance.pass);
    assert_eq!(balance.score(RESPONSE_SHAPE), Some(1.0));
    assert_eq!(balance.score(HALLUCINATION), Some(NOT_EVALUATED));
    assert!(balance.latency_ms.is_some());

    // Policy answers are always checked; three distinct numbers trip the heuristic.
    let policy = by_id("policy");
    assert!(policy.pass);
    assert_eq!(policy.score(HALLUCINATION), Some(0.0));
    assert_eq!(policy.score(RESPONSE_SHAPE), Some(NOT_EVALUATED));

    let tax = by_id("tax");
    assert_eq!(tax.score(HALLUCINATION), Some(1.0));

    // Far-apart ids go to the explanation service.
    let miss = by_id("miss");
    assert!(!miss.pass);
    assert_eq!(miss.predicted, "/hr/policy");
    assert_eq!(miss.reason, "将政策类问题误判为其他操作。");

    // Near-miss ids are explained locally.
    let contract = by_id("contract");
    assert!(!contract.pass);
    assert!(contract.reason.contains("路径高度相似"));
    assert_eq!(explainer.calls.load(Ordering::SeqCst), 1);

    assert_eq!(outcome.accumulator.shape.scored, 1);
    assert_eq!(outcome.accumulator.hallucination.scored, 2);
    assert_eq!(sink.scores(ROUTING_ACCURACY).len(), 5);

    let report = BatchReport::build(&cases, &outcome).expect("report");
    assert_eq!(report.summary.total, 5);
    assert_eq!(report.summary.accuracy_pct, 60.0);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| f.category == FailureCategory::RoutingMismatch));

    let md = render_summary_md(&report);
    assert!(md.contains("- accuracy: 60.00%"));
    assert!(md.contains("| miss |"));

    let dir = tempfile::tempdir().expect("tempdir");
    write_report_dir(dir.path(), &report).expect("write report");
    assert!(dir.path().join("report.json").exists());
    assert!(dir.path().join("summary.md").exists());
}

#[tokio::test]
async fn gate_reflects_run_outcome() {
    let explainer = Arc::new(Explainer {
        calls: AtomicUsize::new(0),
    });
    let cases = batch();
    let outcome = driver(explainer, Arc::new(MemoryTraceSink::new()))
        .run(&cases, &specs())
        .await
        .expect("run");
    let report = BatchReport::build(&cases, &outcome).expect("report");

    let rules = GateRuleSet::standard().with_rule(GateRule::MinShapeCompliance);
    let verdict = evaluate_gate(&rules, &report.summary);
    assert!(!verdict.passed());
    assert_eq!(verdict.violations.len(), 1);
    assert_eq!(verdict.violations[0].rule, GateRule::MinAccuracy);
}

#[tokio::test]
async fn routing_only_run_never_executes() {
    let explainer = Arc::new(Explainer {
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(MemoryTraceSink::new());
    let outcome = driver(explainer, sink.clone())
        .with_config(RunConfig::default().with_execute(false))
        .run(&batch(), &specs())
        .await
        .expect("run");

    assert!(sink.calls().is_empty());
    for record in &outcome.records {
        assert_eq!(record.score(RESPONSE_SHAPE), Some(NOT_EVALUATED));
        assert_eq!(record.score(HALLUCINATION), Some(NOT_EVALUATED));
        assert!(record.response.is_none());
    }
}

/// Routes by the quoted user question in the prompt.
struct ScriptedModel;

#[async_trait]
impl CompletionService for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError> {
        if prompt.user.contains("“我的年假还有几天”") {
            Ok("`/hr/leave/balance`。".to_string())
        } else if prompt.user.contains("“个税扣了多少”") {
            Err(CompletionError::Status {
                status: 429,
                body: "rate limited".into(),
            })
        } else {
            Ok("other".to_string())
        }
    }
}

#[tokio::test(start_paused = true)]
async fn model_classifier_errors_are_recorded_and_batch_continues() {
    let catalog = Arc::new(OperationCatalog::builtin().expect("catalog"));
    let model = ModelClassifier::new(Arc::new(ScriptedModel), catalog.clone())
        .with_cooldown(Duration::from_secs(20));
    let explainer = Arc::new(Explainer {
        calls: AtomicUsize::new(0),
    });
    let driver = RunDriver::new(catalog, Arc::new(model), Evaluator::new(explainer.clone()))
        .with_gateway(ExecutionGateway::new(Arc::new(HrBackend), Tracer::local()));

    let cases = vec![
        TestCase::new("a", "我的年假还有几天", "/hr/leave/balance"),
        TestCase::new("b", "个税扣了多少", "/hr/payroll/tax"),
        TestCase::new("c", "公司年会几号", "/hr/policy"),
    ];
    let outcome = driver.run(&cases, &HashMap::new()).await.expect("run");

    assert_eq!(outcome.classifier, "model");
    assert!(outcome.records[0].pass);
    assert_eq!(outcome.records[0].predicted, "/hr/leave/balance");

    let failed = &outcome.records[1];
    assert!(failed.classification_failed);
    assert!(failed.reason.contains("429"));

    let unresolved = &outcome.records[2];
    assert!(!unresolved.pass);
    assert_eq!(unresolved.predicted, "other");
    assert!(unresolved.reason.contains("未匹配到任何操作"));
    assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);

    let report = BatchReport::build(&cases, &outcome).expect("report");
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].category, FailureCategory::ClassificationError);
    assert_eq!(report.failures[1].category, FailureCategory::RoutingMismatch);
}

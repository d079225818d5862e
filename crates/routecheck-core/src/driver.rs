//! Run driver.
//!
//! Streams a test batch through classify -> evaluate -> execute -> score and
//! collects one [`EvalRecord`] per case, in batch order. Per-case failures
//! are recorded and the batch continues; only an invalid batch fails the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::catalog::OperationCatalog;
use crate::classifier::Classifier;
use crate::config::parsed_env;
use crate::dataset::ensure_unique_ids;
use crate::domain::{
    error_response, truncate_message, Behavior, EvalRecord, ResponseSpec, RoutePlan, TestCase,
    UserTurn, HALLUCINATION, NOT_EVALUATED, RESPONSE_SHAPE,
};
use crate::evaluator::Evaluator;
use crate::gateway::ExecutionGateway;
use crate::metrics::METRICS;
use crate::obs;
use crate::scoring::{coerce_text, score_shape, score_text, RunAccumulator};

/// Operation whose cases are always checked for fabricated facts.
pub const POLICY_OPERATION: &str = "/hr/policy";

/// Query keywords that opt a case into the hallucination check.
const GUARDED_QUERY_KEYWORDS: &[&str] = &["政策", "查询"];

/// Characters of a classifier error kept in the record reason.
const CLASSIFY_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Call the backend and score the response; `false` is a routing-only run.
    pub execute: bool,
    /// Cases in flight at once.
    pub max_concurrent: usize,
    /// Infer a hallucination check for specs without a behavior tag.
    pub infer_behavior: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            execute: true,
            max_concurrent: 1,
            infer_behavior: true,
        }
    }
}

impl RunConfig {
    /// Read `ROUTECHECK_MAX_CONCURRENT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: parsed_env("ROUTECHECK_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            ..defaults
        }
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_infer_behavior(mut self, infer_behavior: bool) -> Self {
        self.infer_behavior = infer_behavior;
        self
    }
}

/// The behavior tag the hallucination check runs under, if any.
///
/// An explicit tag wins. Without one, policy lookups and queries mentioning
/// policy or lookup keywords are guarded when `infer` is set.
pub fn infer_behavior(case: &TestCase, spec: Option<&ResponseSpec>, infer: bool) -> Option<Behavior> {
    if let Some(behavior) = spec.and_then(|s| s.behavior.clone()) {
        return Some(behavior);
    }
    if !infer {
        return None;
    }
    let guarded = case.expected_operation.trim() == POLICY_OPERATION
        || GUARDED_QUERY_KEYWORDS.iter().any(|k| case.query.contains(k));
    guarded.then_some(Behavior::ShouldNotHallucinate)
}

/// Result of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub batch_id: String,
    pub classifier: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub records: Vec<EvalRecord>,
    pub accumulator: RunAccumulator,
}

impl RunOutcome {
    pub fn passed(&self) -> usize {
        self.records.iter().filter(|r| r.pass).count()
    }
}

pub struct RunDriver {
    catalog: Arc<OperationCatalog>,
    classifier: Arc<dyn Classifier>,
    evaluator: Evaluator,
    gateway: Option<ExecutionGateway>,
    config: RunConfig,
}

impl RunDriver {
    /// A routing-only driver; add a gateway to execute plans.
    pub fn new(
        catalog: Arc<OperationCatalog>,
        classifier: Arc<dyn Classifier>,
        evaluator: Evaluator,
    ) -> Self {
        Self {
            catalog,
            classifier,
            evaluator,
            gateway: None,
            config: RunConfig::default(),
        }
    }

    pub fn with_gateway(mut self, gateway: ExecutionGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run every case and return the records in batch order.
    ///
    /// Fails only when the batch itself is invalid (duplicate ids).
    pub async fn run(
        &self,
        cases: &[TestCase],
        specs: &HashMap<String, ResponseSpec>,
    ) -> crate::domain::Result<RunOutcome> {
        ensure_unique_ids(cases)?;

        let batch_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_batch_started(&batch_id, self.classifier.name(), cases.len());

        let permits = Semaphore::new(self.config.max_concurrent.max(1));
        let records = join_all(cases.iter().map(|case| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await.ok();
                self.run_case(case, specs.get(&case.id)).await
            }
            .instrument(obs::case_span(&case.id))
        }))
        .await;

        let accumulator = RunAccumulator::from_records(&records);
        let outcome = RunOutcome {
            batch_id,
            classifier: self.classifier.name().to_string(),
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            records,
            accumulator,
        };

        obs::emit_batch_finished(
            &outcome.batch_id,
            outcome.duration_ms,
            outcome.records.len(),
            outcome.passed(),
        );
        METRICS.flush();
        Ok(outcome)
    }

    /// Classify, evaluate and (optionally) execute one case. Never fails.
    pub async fn run_case(&self, case: &TestCase, spec: Option<&ResponseSpec>) -> EvalRecord {
        let turn = UserTurn::new(case.query.clone());
        let plan = match self.classifier.route(&turn).await {
            Ok(plan) => plan,
            Err(err) => {
                obs::emit_case_classify_error(&case.id, &err);
                let mut record =
                    EvalRecord::failed(&case.id, truncate_message(&err.to_string(), CLASSIFY_ERROR_CHARS));
                record.query = case.query.clone();
                record.expected = case.expected_operation.trim().to_string();
                record.classification_failed = true;
                obs::emit_case_finished(&case.id, false);
                return record;
            }
        };
        obs::emit_case_routed(&case.id, &plan.operation, &plan.reason);

        let mut record = self.evaluator.evaluate(case, &plan.operation).await;
        record.set_score(RESPONSE_SHAPE, NOT_EVALUATED);
        record.set_score(HALLUCINATION, NOT_EVALUATED);

        if self.config.execute {
            if let Some(gateway) = &self.gateway {
                self.execute_and_score(gateway, case, spec, &plan, &mut record)
                    .await;
            }
        }

        obs::emit_case_finished(&case.id, record.pass);
        record
    }

    async fn execute_and_score(
        &self,
        gateway: &ExecutionGateway,
        case: &TestCase,
        spec: Option<&ResponseSpec>,
        plan: &RoutePlan,
        record: &mut EvalRecord,
    ) {
        let operation = plan.operation.trim();
        if !self.catalog.contains(operation) {
            debug!(case_id = %case.id, operation = %operation, "route not in catalog; not executed");
            record.response = Some(error_response(format!("unresolved route: {operation}")));
            return;
        }

        let plan = RoutePlan {
            operation: operation.to_string(),
            ..plan.clone()
        };
        let execution = gateway.execute(&case.id, &case.query, &plan).await;
        let response: &Value = &execution.trace.response;
        record.latency_ms = Some(execution.trace.latency_ms);

        if !execution.trace.is_error() {
            if let Some(spec) = spec.filter(|s| !s.has_no_shape_checks()) {
                record.set_score(RESPONSE_SHAPE, score_shape(response, Some(spec)));
            }
            if let Some(behavior) = infer_behavior(case, spec, self.config.infer_behavior) {
                record.set_score(HALLUCINATION, score_text(&coerce_text(response), Some(&behavior)));
            }
        }

        let tracer = gateway.tracer();
        for (name, value) in &record.scores {
            if *value >= 0.0 {
                tracer.score(execution.trace_id.as_ref(), name, *value).await;
            }
        }
        record.response = Some(execution.trace.response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RuleClassifier;
    use crate::completion::{CompletionError, CompletionService, Prompt};
    use crate::domain::{RouteCheckError, ROUTING_ACCURACY};
    use crate::gateway::{BackendError, OperationBackend};
    use crate::trace_sink::{MemoryTraceSink, Tracer};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CannedExplainer;

    #[async_trait]
    impl CompletionService for CannedExplainer {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, CompletionError> {
            Ok("路由到了无关的操作。".to_string())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn route(&self, turn: &UserTurn) -> Result<RoutePlan, CompletionError> {
            if turn.query.contains("坏") {
                Err(CompletionError::Http("connection reset by peer".into()))
            } else {
                Ok(RoutePlan::new("/hr/policy", "stub"))
            }
        }
    }

    struct FixedRoute(&'static str);

    #[async_trait]
    impl Classifier for FixedRoute {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn route(&self, _turn: &UserTurn) -> Result<RoutePlan, CompletionError> {
            Ok(RoutePlan::new(self.0, "stub"))
        }
    }

    /// Backend answering from a table; unknown operations fail with 404.
    #[derive(Default)]
    struct TableBackend {
        responses: HashMap<&'static str, Value>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl TableBackend {
        fn with(mut self, operation: &'static str, response: Value) -> Self {
            self.responses.insert(operation, response);
            self
        }
    }

    #[async_trait]
    impl OperationBackend for TableBackend {
        async fn call(&self, operation: &str, _params: &Map<String, Value>) -> Result<Value, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .get(operation)
                .cloned()
                .ok_or_else(|| BackendError::Status {
                    status: 404,
                    body: "not found".into(),
                })
        }
    }

    fn catalog() -> Arc<OperationCatalog> {
        Arc::new(OperationCatalog::builtin().expect("builtin catalog"))
    }

    fn driver(classifier: Arc<dyn Classifier>) -> RunDriver {
        RunDriver::new(catalog(), classifier, Evaluator::new(Arc::new(CannedExplainer)))
    }

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new("c1", "我的年假还有几天", "/hr/leave/balance"),
            TestCase::new("c2", "婚假的规定是什么", "/hr/policy"),
            TestCase::new("c3", "帮我续签合同", "/hr/contract/view"),
        ]
    }

    #[test]
    fn test_infer_behavior() {
        let policy = TestCase::new("a", "婚假几天", "/hr/policy");
        let lookup = TestCase::new("b", "查询我的工资", "/hr/payroll/info");
        let plain = TestCase::new("c", "帮我打卡", "/hr/attendance/checkin");
        let tagged = ResponseSpec::default().with_behavior(Behavior::Normal);

        assert_eq!(infer_behavior(&policy, None, true), Some(Behavior::ShouldNotHallucinate));
        assert_eq!(infer_behavior(&lookup, None, true), Some(Behavior::ShouldNotHallucinate));
        assert_eq!(infer_behavior(&plain, None, true), None);
        assert_eq!(infer_behavior(&policy, Some(&tagged), true), Some(Behavior::Normal));
        assert_eq!(infer_behavior(&policy, None, false), None);
    }

    #[tokio::test]
    async fn test_routing_only_run_keeps_batch_order() {
        let outcome = driver(Arc::new(RuleClassifier::default()))
            .run(&cases(), &HashMap::new())
            .await
            .expect("run");

        let ids: Vec<_> = outcome.records.iter().map(|r| r.case_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        assert_eq!(outcome.classifier, "rule");
        assert!(outcome.records[0].pass);
        assert!(outcome.records[1].pass);
        assert!(!outcome.records[2].pass);
        // Sibling ids: near-miss template, no service call.
        assert!(outcome.records[2].reason.contains("合同续签"));
        for record in &outcome.records {
            assert_eq!(record.score(RESPONSE_SHAPE), Some(NOT_EVALUATED));
            assert_eq!(record.score(HALLUCINATION), Some(NOT_EVALUATED));
            assert!(record.response.is_none());
        }
        assert_eq!(outcome.accumulator.routing.pass_rate(), Some(2.0 / 3.0));
        assert_eq!(outcome.accumulator.shape.mean(), None);
    }

    #[tokio::test]
    async fn test_classifier_error_fails_case_and_batch_continues() {
        let batch = vec![
            TestCase::new("ok-1", "婚假政策", "/hr/policy"),
            TestCase::new("bad", "坏请求", "/hr/policy"),
            TestCase::new("ok-2", "考勤制度", "/hr/policy"),
        ];
        let outcome = driver(Arc::new(FailingClassifier))
            .run(&batch, &HashMap::new())
            .await
            .expect("run");

        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records[0].pass);
        let failed = &outcome.records[1];
        assert!(!failed.pass);
        assert!(failed.reason.contains("connection reset by peer"));
        assert_eq!(failed.predicted, "");
        assert!(failed.classification_failed);
        assert!(!outcome.records[0].classification_failed);
        assert_eq!(failed.score(ROUTING_ACCURACY), Some(0.0));
        assert!(outcome.records[2].pass);
    }

    #[tokio::test]
    async fn test_duplicate_ids_reject_batch() {
        let batch = vec![
            TestCase::new("dup", "a", "/hr/policy"),
            TestCase::new("dup", "b", "/hr/policy"),
        ];
        let err = driver(Arc::new(RuleClassifier::default()))
            .run(&batch, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteCheckError::DuplicateCaseId(id) if id == "dup"));
    }

    #[tokio::test]
    async fn test_execution_scores_shape_and_hallucination() {
        let backend = TableBackend::default()
            .with(
                "/hr/leave/balance",
                json!({"employee_id": "E12345", "annual_leave_remaining": 7}),
            )
            .with(
                "/hr/policy",
                json!({"message": "婚假 3 天，晚婚另加 7 天，需提前 15 天申请"}),
            );
        let sink = Arc::new(MemoryTraceSink::new());
        let gateway = ExecutionGateway::new(Arc::new(backend), Tracer::new(sink.clone()));

        let mut specs = HashMap::new();
        specs.insert(
            "c1".to_string(),
            ResponseSpec::default()
                .with_keys(["employee_id", "annual_leave_remaining"])
                .with_equals("employee_id", json!("E12345")),
        );

        let outcome = driver(Arc::new(RuleClassifier::default()))
            .with_gateway(gateway)
            .run(&cases()[..2], &specs)
            .await
            .expect("run");

        let balance = &outcome.records[0];
        assert_eq!(balance.score(RESPONSE_SHAPE), Some(1.0));
        assert_eq!(balance.score(HALLUCINATION), Some(NOT_EVALUATED));
        assert!(balance.latency_ms.is_some());

        let policy = &outcome.records[1];
        assert_eq!(policy.score(RESPONSE_SHAPE), Some(NOT_EVALUATED));
        assert_eq!(policy.score(HALLUCINATION), Some(0.0));

        assert_eq!(outcome.accumulator.shape.scored, 1);
        assert_eq!(outcome.accumulator.hallucination.scored, 1);
        assert_eq!(sink.scores(HALLUCINATION), vec![0.0]);
        assert_eq!(sink.scores(ROUTING_ACCURACY), vec![1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_error_marked_response_is_not_evaluated() {
        let backend = Arc::new(TableBackend::default());
        let gateway = ExecutionGateway::new(backend.clone(), Tracer::local());
        let mut specs = HashMap::new();
        specs.insert("c1".to_string(), ResponseSpec::default().with_keys(["employee_id"]));

        let outcome = driver(Arc::new(RuleClassifier::default()))
            .with_gateway(gateway)
            .run(&cases()[..1], &specs)
            .await
            .expect("run");

        let record = &outcome.records[0];
        assert!(record.pass);
        assert_eq!(record.score(RESPONSE_SHAPE), Some(NOT_EVALUATED));
        assert_eq!(record.score(HALLUCINATION), Some(NOT_EVALUATED));
        assert!(crate::domain::is_error_response(
            record.response.as_ref().expect("response")
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_sent() {
        let backend = Arc::new(TableBackend::default());
        let gateway = ExecutionGateway::new(backend.clone(), Tracer::local());
        let outcome = driver(Arc::new(FixedRoute("other")))
            .with_gateway(gateway)
            .run(&cases()[..1], &HashMap::new())
            .await
            .expect("run");

        let record = &outcome.records[0];
        assert!(!record.pass);
        assert!(record.reason.contains("未匹配到任何操作"));
        let response = record.response.as_ref().expect("response");
        assert_eq!(response["__error__"], json!("unresolved route: other"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_execute_skips_backend() {
        let backend = Arc::new(TableBackend::default());
        let gateway = ExecutionGateway::new(backend.clone(), Tracer::local());
        let outcome = driver(Arc::new(RuleClassifier::default()))
            .with_gateway(gateway)
            .with_config(RunConfig::default().with_execute(false))
            .run(&cases(), &HashMap::new())
            .await
            .expect("run");
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_run_preserves_order() {
        let backend = TableBackend {
            delay: Some(Duration::from_millis(100)),
            ..TableBackend::default()
        }
        .with("/hr/leave/balance", json!({"ok": true}))
        .with("/hr/policy", json!({"message": "暂无"}))
        .with("/hr/contract/renew", json!({"ok": true}));
        let gateway = ExecutionGateway::new(Arc::new(backend), Tracer::local());

        let outcome = driver(Arc::new(RuleClassifier::default()))
            .with_gateway(gateway)
            .with_config(RunConfig::default().with_max_concurrent(3))
            .run(&cases(), &HashMap::new())
            .await
            .expect("run");

        let ids: Vec<_> = outcome.records.iter().map(|r| r.case_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        assert_eq!(outcome.records[1].score(HALLUCINATION), Some(1.0));
    }
}

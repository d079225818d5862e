//! Execution gateway.
//!
//! Sends a route plan to the operation backend, times the round trip and
//! records it on a trace. Backend failures come back as an error-marked
//! response rather than an `Err`, so a batch keeps going.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{non_empty_env, parsed_env};
use crate::domain::{error_response, truncate_message, ExecutionTrace, RoutePlan};
use crate::metrics::METRICS;
use crate::obs;
use crate::trace_sink::{TraceId, Tracer};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(String),

    #[error("backend request timed out after {0}s")]
    Timeout(u64),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend returned a non-JSON body: {0}")]
    InvalidResponse(String),
}

/// Capability: invoke one catalog operation.
#[async_trait]
pub trait OperationBackend: Send + Sync {
    async fn call(&self, operation: &str, params: &Map<String, Value>) -> Result<Value, BackendError>;

    /// Where `operation` is served, for trace records.
    fn endpoint(&self, operation: &str) -> String {
        operation.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// Read `ROUTECHECK_BACKEND_URL` and `ROUTECHECK_BACKEND_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: non_empty_env("ROUTECHECK_BACKEND_URL").unwrap_or(defaults.base_url),
            timeout_secs: parsed_env("ROUTECHECK_BACKEND_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// HTTP backend: one `GET {base_url}{operation}` per call, params as query
/// string.
pub struct HttpBackend {
    config: BackendConfig,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("routecheck/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl OperationBackend for HttpBackend {
    async fn call(&self, operation: &str, params: &Map<String, Value>) -> Result<Value, BackendError> {
        let query: Vec<(&str, String)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), query_value(v)))
            .collect();

        let response = self
            .http
            .get(self.endpoint(operation))
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.config.timeout_secs)
                } else {
                    BackendError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_message(&body, 200),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), operation)
    }
}

/// The gateway's output: what happened, plus the trace it was recorded on.
#[derive(Debug, Clone)]
pub struct Execution {
    pub trace: ExecutionTrace,
    pub trace_id: Option<TraceId>,
}

pub struct ExecutionGateway {
    backend: Arc<dyn OperationBackend>,
    tracer: Tracer,
}

impl ExecutionGateway {
    pub fn new(backend: Arc<dyn OperationBackend>, tracer: Tracer) -> Self {
        Self { backend, tracer }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Execute `plan` for one case.
    ///
    /// The trace is started before the call and ended after it; trace
    /// failures are dropped. Scores may still be attached to the returned
    /// trace id afterwards.
    pub async fn execute(&self, case_id: &str, query: &str, plan: &RoutePlan) -> Execution {
        let trace_id = self
            .tracer
            .start(&format!("case_{case_id}"), &json!(query))
            .await;

        let url = self.backend.endpoint(&plan.operation);
        let request = json!({
            "method": "GET",
            "url": url,
            "operation": plan.operation,
            "params": plan.params,
        });

        METRICS.inc_backend_calls();
        let started = Instant::now();
        let result = self.backend.call(&plan.operation, &plan.params).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let response = match result {
            Ok(body) => body,
            Err(err) => {
                METRICS.inc_backend_failures();
                debug!(case_id = %case_id, error = %err, "backend call failed");
                error_response(err.to_string())
            }
        };

        self.tracer
            .event(
                trace_id.as_ref(),
                "api_call",
                &json!({"url": url, "response": response, "latency_ms": latency_ms}),
            )
            .await;
        self.tracer.end(trace_id.as_ref()).await;

        let trace = ExecutionTrace {
            request,
            response,
            latency_ms,
        };
        obs::emit_case_executed(case_id, &plan.operation, latency_ms, trace.is_error());

        Execution { trace, trace_id }
    }
}

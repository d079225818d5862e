//! Trace sinks for execution observability.
//!
//! A [`TraceSink`] receives one trace per executed case: a start, any number
//! of events and scores, and an end. Sinks may fail; callers go through
//! [`Tracer`], which logs and drops every failure so tracing never affects
//! the request flow.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::non_empty_env;
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum TraceSinkError {
    #[error("trace collector request failed: {0}")]
    Http(String),

    #[error("trace collector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("trace sink is not configured: {0}")]
    NotConfigured(String),
}

/// Capability: receive trace lifecycle calls.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn start(&self, name: &str, input: &Value) -> Result<TraceId, TraceSinkError>;

    async fn event(&self, trace: &TraceId, name: &str, metadata: &Value) -> Result<(), TraceSinkError>;

    async fn score(&self, trace: &TraceId, name: &str, value: f64) -> Result<(), TraceSinkError>;

    async fn end(&self, trace: &TraceId) -> Result<(), TraceSinkError>;
}

/// Best-effort front for a [`TraceSink`].
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink }
    }

    /// A tracer that only logs locally.
    pub fn local() -> Self {
        Self::new(Arc::new(LogTraceSink))
    }

    pub async fn start(&self, name: &str, input: &Value) -> Option<TraceId> {
        match self.sink.start(name, input).await {
            Ok(id) => Some(id),
            Err(err) => {
                dropped("start", &err);
                None
            }
        }
    }

    pub async fn event(&self, trace: Option<&TraceId>, name: &str, metadata: &Value) {
        let Some(trace) = trace else { return };
        if let Err(err) = self.sink.event(trace, name, metadata).await {
            dropped("event", &err);
        }
    }

    pub async fn score(&self, trace: Option<&TraceId>, name: &str, value: f64) {
        let Some(trace) = trace else { return };
        if let Err(err) = self.sink.score(trace, name, value).await {
            dropped("score", &err);
        }
    }

    pub async fn end(&self, trace: Option<&TraceId>) {
        let Some(trace) = trace else { return };
        if let Err(err) = self.sink.end(trace).await {
            dropped("end", &err);
        }
    }
}

fn dropped(operation: &str, err: &TraceSinkError) {
    METRICS.inc_trace_sink_failures();
    obs::emit_trace_sink_error(operation, err);
}

/// Local-only sink: every call becomes a `debug!` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTraceSink;

#[async_trait]
impl TraceSink for LogTraceSink {
    async fn start(&self, name: &str, _input: &Value) -> Result<TraceId, TraceSinkError> {
        let id = TraceId::new();
        debug!(trace_id = %id, name = %name, "trace started");
        Ok(id)
    }

    async fn event(&self, trace: &TraceId, name: &str, _metadata: &Value) -> Result<(), TraceSinkError> {
        debug!(trace_id = %trace, name = %name, "trace event");
        Ok(())
    }

    async fn score(&self, trace: &TraceId, name: &str, value: f64) -> Result<(), TraceSinkError> {
        debug!(trace_id = %trace, name = %name, value = value, "trace score");
        Ok(())
    }

    async fn end(&self, trace: &TraceId) -> Result<(), TraceSinkError> {
        debug!(trace_id = %trace, "trace ended");
        Ok(())
    }
}

/// One call received by a [`MemoryTraceSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum TraceCall {
    Start { trace: TraceId, name: String, input: Value },
    Event { trace: TraceId, name: String, metadata: Value },
    Score { trace: TraceId, name: String, value: f64 },
    End { trace: TraceId },
}

/// In-memory sink that records every call, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    calls: Mutex<Vec<TraceCall>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TraceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Scores recorded under `name`, in call order.
    pub fn scores(&self, name: &str) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TraceCall::Score { name: n, value, .. } if n == name => Some(value),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: TraceCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn start(&self, name: &str, input: &Value) -> Result<TraceId, TraceSinkError> {
        let trace = TraceId::new();
        self.push(TraceCall::Start {
            trace: trace.clone(),
            name: name.to_string(),
            input: input.clone(),
        });
        Ok(trace)
    }

    async fn event(&self, trace: &TraceId, name: &str, metadata: &Value) -> Result<(), TraceSinkError> {
        self.push(TraceCall::Event {
            trace: trace.clone(),
            name: name.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    async fn score(&self, trace: &TraceId, name: &str, value: f64) -> Result<(), TraceSinkError> {
        self.push(TraceCall::Score {
            trace: trace.clone(),
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    async fn end(&self, trace: &TraceId) -> Result<(), TraceSinkError> {
        self.push(TraceCall::End {
            trace: trace.clone(),
        });
        Ok(())
    }
}

/// Langfuse collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub host: String,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:3000".to_string(),
            public_key: None,
            secret_key: None,
            timeout_secs: 10,
        }
    }
}

impl TraceConfig {
    /// Read `LANGFUSE_PUBLIC_KEY`, `LANGFUSE_SECRET_KEY` and `LANGFUSE_HOST`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: non_empty_env("LANGFUSE_HOST").unwrap_or(defaults.host),
            public_key: non_empty_env("LANGFUSE_PUBLIC_KEY"),
            secret_key: non_empty_env("LANGFUSE_SECRET_KEY"),
            timeout_secs: defaults.timeout_secs,
        }
    }

    /// Remote tracing needs both keys.
    pub fn is_enabled(&self) -> bool {
        self.public_key.is_some() && self.secret_key.is_some()
    }

    /// Langfuse sink when enabled, local logging otherwise.
    pub fn build_sink(&self) -> Arc<dyn TraceSink> {
        if self.is_enabled() {
            match LangfuseSink::new(self.clone()) {
                Ok(sink) => {
                    info!(host = %self.host, "tracing to Langfuse collector");
                    return Arc::new(sink);
                }
                Err(err) => obs::emit_trace_sink_error("init", &err),
            }
        } else {
            debug!("Langfuse not configured; local trace logging only");
        }
        Arc::new(LogTraceSink)
    }
}

/// Posts trace data to a Langfuse-compatible `/api/public/ingestion` endpoint.
pub struct LangfuseSink {
    config: TraceConfig,
    public_key: String,
    secret_key: String,
    http: reqwest::Client,
}

impl LangfuseSink {
    pub fn new(config: TraceConfig) -> Result<Self, TraceSinkError> {
        let public_key = config
            .public_key
            .clone()
            .ok_or_else(|| TraceSinkError::NotConfigured("LANGFUSE_PUBLIC_KEY is not set".into()))?;
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| TraceSinkError::NotConfigured("LANGFUSE_SECRET_KEY is not set".into()))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("routecheck/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TraceSinkError::Http(e.to_string()))?;
        Ok(Self {
            config,
            public_key,
            secret_key,
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/public/ingestion", self.config.host.trim_end_matches('/'))
    }

    async fn ingest(&self, kind: &str, body: Value) -> Result<(), TraceSinkError> {
        let envelope = json!({
            "batch": [{
                "id": Uuid::new_v4().to_string(),
                "timestamp": Utc::now().to_rfc3339(),
                "type": kind,
                "body": body,
            }]
        });

        let response = self
            .http
            .post(self.endpoint())
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| TraceSinkError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraceSinkError::Status {
                status: status.as_u16(),
                body: crate::domain::truncate_message(&body, 200),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TraceSink for LangfuseSink {
    async fn start(&self, name: &str, input: &Value) -> Result<TraceId, TraceSinkError> {
        let trace = TraceId::new();
        self.ingest(
            "trace-create",
            json!({"id": trace.as_str(), "name": name, "input": input}),
        )
        .await?;
        Ok(trace)
    }

    async fn event(&self, trace: &TraceId, name: &str, metadata: &Value) -> Result<(), TraceSinkError> {
        self.ingest(
            "event-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": trace.as_str(),
                "name": name,
                "metadata": metadata,
            }),
        )
        .await
    }

    async fn score(&self, trace: &TraceId, name: &str, value: f64) -> Result<(), TraceSinkError> {
        self.ingest(
            "score-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": trace.as_str(),
                "name": name,
                "value": value,
            }),
        )
        .await
    }

    /// Traces are closed by the collector; nothing is sent.
    async fn end(&self, trace: &TraceId) -> Result<(), TraceSinkError> {
        debug!(trace_id = %trace, "trace ended");
        Ok(())
    }
}

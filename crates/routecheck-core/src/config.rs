//! Harness configuration.
//!
//! Each collaborator owns its settings struct with a `Default` and a
//! `from_env()` constructor; [`HarnessConfig`] groups them for binaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::DEFAULT_COOLDOWN;
use crate::completion::CompletionConfig;
use crate::driver::RunConfig;
use crate::gateway::BackendConfig;
use crate::trace_sink::TraceConfig;

/// An environment variable, treating blank values as unset.
pub fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, keeping `default` when unset or invalid.
pub fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    non_empty_env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub completion: CompletionConfig,
    pub backend: BackendConfig,
    pub trace: TraceConfig,
    pub run: RunConfig,
    /// Pause after every model-classifier call.
    pub classifier_cooldown_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            completion: CompletionConfig::default(),
            backend: BackendConfig::default(),
            trace: TraceConfig::default(),
            run: RunConfig::default(),
            classifier_cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            completion: CompletionConfig::from_env(),
            backend: BackendConfig::from_env(),
            trace: TraceConfig::from_env(),
            run: RunConfig::from_env(),
            classifier_cooldown_ms: parsed_env(
                "ROUTECHECK_CLASSIFIER_COOLDOWN_MS",
                defaults.classifier_cooldown_ms,
            ),
        }
    }

    pub fn classifier_cooldown(&self) -> Duration {
        Duration::from_millis(self.classifier_cooldown_ms)
    }
}

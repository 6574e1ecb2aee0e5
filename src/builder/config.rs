//! Engine configuration with accumulated validation.

use crate::hooks::DispatchMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// Problems found in an [`EngineConfig`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Engine label must not be empty")]
    EmptyLabel,

    #[error("Goal recheck interval must be positive")]
    ZeroRecheckInterval,

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Tunables for an engine. Every field has a default, so partial JSON
/// documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Diagnostic label for logs and background thread names
    pub label: String,
    pub hook_dispatch: DispatchMode,
    /// Sleep between goal checks in `wait_for_goal`
    pub recheck_interval_ms: u64,
    /// Transitions kept in the history; 0 disables recording
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label: "engine".to_string(),
            hook_dispatch: DispatchMode::Worker,
            recheck_interval_ms: 100,
            history_limit: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document.
    ///
    /// ```rust
    /// use convergent::builder::EngineConfig;
    /// use convergent::hooks::DispatchMode;
    ///
    /// let config = EngineConfig::from_json(r#"{"label": "link", "hook_dispatch": "inline"}"#).unwrap();
    /// assert_eq!(config.label, "link");
    /// assert_eq!(config.hook_dispatch, DispatchMode::Inline);
    /// assert_eq!(config.recheck_interval_ms, 100);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }

    /// Check every rule, collecting all violations.
    pub fn validate(&self) -> Validation<(), NonEmptyVec<ConfigError>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<ConfigError>>> = Vec::new();

        checks.push(if self.label.trim().is_empty() {
            Validation::fail(ConfigError::EmptyLabel)
        } else {
            Validation::success(())
        });

        checks.push(if self.recheck_interval_ms == 0 {
            Validation::fail(ConfigError::ZeroRecheckInterval)
        } else {
            Validation::success(())
        });

        Validation::all_vec(checks).map(|_| ())
    }
}

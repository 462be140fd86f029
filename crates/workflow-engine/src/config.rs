//! Engine configuration
//!
//! Loaded from a JSON file; missing fields take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{EngineError, Result};

/// Default configuration values
pub mod defaults {
    /// Maximum number of composite expansions per graph
    pub const MAX_COMPOSITE_DEPTH: usize = 5;
    /// Validate the bound graph at the start of every run
    pub const VALIDATE_BEFORE_RUN: bool = true;
    /// Runner endpoint executing single nodes
    pub const RUNNER_URL: &str = "http://localhost:8000/api/v1/runner/execute/node";
}

/// Settings shared by preparation and execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on composite expansions
    #[serde(default = "default_max_composite_depth")]
    pub max_composite_depth: usize,
    /// Whether `start()` validates the graph before running
    #[serde(default = "default_validate_before_run")]
    pub validate_before_run: bool,
    /// Per-node timeout in seconds; none waits indefinitely
    #[serde(default)]
    pub node_timeout_secs: Option<u64>,
    /// Endpoint used by the HTTP executor
    #[serde(default = "default_runner_url")]
    pub runner_url: String,
}

fn default_max_composite_depth() -> usize {
    defaults::MAX_COMPOSITE_DEPTH
}

fn default_validate_before_run() -> bool {
    defaults::VALIDATE_BEFORE_RUN
}

fn default_runner_url() -> String {
    defaults::RUNNER_URL.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_composite_depth: defaults::MAX_COMPOSITE_DEPTH,
            validate_before_run: defaults::VALIDATE_BEFORE_RUN,
            node_timeout_secs: None,
            runner_url: default_runner_url(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        log::debug!("Loaded engine configuration from {:?}", path);
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.node_timeout_secs == Some(0) {
            return Err(EngineError::Config(
                "node_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.runner_url.trim().is_empty() {
            return Err(EngineError::Config("runner_url must not be empty".to_string()));
        }
        Ok(())
    }

    /// Per-node timeout, if configured
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }
}

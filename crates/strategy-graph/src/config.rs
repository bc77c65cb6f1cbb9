//! Engine configuration
//!
//! Limits used by the store, validator, undo history and storage sanitizer.
//! Every field has a default so partial JSON files are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, DENIED_PROPERTIES};
use crate::error::{Result, StrategyError};

/// Configuration for a strategy editing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Number of undo snapshots retained
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Outgoing edge count above which a warning is raised
    #[serde(default = "default_max_outgoing_edges")]
    pub max_outgoing_edges: usize,
    /// Maximum nesting depth for complex expressions
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,
    /// Storage sampling settings
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Property names removed before persisting
    #[serde(default = "default_denied_properties")]
    pub denied_properties: Vec<String>,
    /// Delay between background saves
    #[serde(default = "default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,
}

/// Which elements of large collections the storage sanitizer visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingConfig {
    /// Collections longer than this are sampled
    pub threshold: usize,
    /// Elements visited at the head and at the tail
    pub edge: usize,
    /// Every n-th middle element is visited
    pub stride: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::SAMPLE_THRESHOLD,
            edge: defaults::SAMPLE_EDGE,
            stride: defaults::SAMPLE_STRIDE,
        }
    }
}

fn default_history_limit() -> usize {
    defaults::HISTORY_LIMIT
}

fn default_max_outgoing_edges() -> usize {
    defaults::MAX_OUTGOING_EDGES
}

fn default_max_expression_depth() -> usize {
    defaults::MAX_EXPRESSION_DEPTH
}

fn default_autosave_interval_ms() -> u64 {
    defaults::AUTOSAVE_INTERVAL_MS
}

fn default_denied_properties() -> Vec<String> {
    DENIED_PROPERTIES.iter().map(|s| s.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_outgoing_edges: default_max_outgoing_edges(),
            max_expression_depth: default_max_expression_depth(),
            sampling: SamplingConfig::default(),
            denied_properties: default_denied_properties(),
            autosave_interval_ms: default_autosave_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn autosave_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.autosave_interval_ms)
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Reject settings that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(StrategyError::Config("historyLimit must be at least 1".into()));
        }
        if self.max_expression_depth == 0 {
            return Err(StrategyError::Config(
                "maxExpressionDepth must be at least 1".into(),
            ));
        }
        if self.autosave_interval_ms == 0 {
            return Err(StrategyError::Config(
                "autosaveIntervalMs must be at least 1".into(),
            ));
        }
        if self.sampling.stride == 0 {
            return Err(StrategyError::Config("sampling.stride must be at least 1".into()));
        }
        if self.sampling.edge * 2 > self.sampling.threshold {
            return Err(StrategyError::Config(
                "sampling.edge must be at most half of sampling.threshold".into(),
            ));
        }
        Ok(())
    }
}

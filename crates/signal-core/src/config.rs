//! Loop configuration
//!
//! Loaded from TOML or JSON (by file extension), then overridden from the
//! environment (`SIGNAL_*`, `.env` honoured) and validated as a whole.

use crate::delta::DeltaConfig;
use crate::error::{Result, ResultExt, SignalError};
use crate::policy::{ActionTemplate, PolicyConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding the deadline budget (ms)
pub const ENV_DEADLINE_MS: &str = "SIGNAL_DEADLINE_MS";
/// Environment variable overriding the autonomy level
pub const ENV_AUTONOMY: &str = "SIGNAL_AUTONOMY";
/// Environment variable overriding the acceptance threshold
pub const ENV_ACCEPTANCE_THRESHOLD: &str = "SIGNAL_ACCEPTANCE_THRESHOLD";
/// Environment variable overriding the per-source queue capacity
pub const ENV_QUEUE_CAPACITY: &str = "SIGNAL_QUEUE_CAPACITY";

/// Whether decisions are carried out or only reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Autonomy {
    /// Issue decisions as actions
    #[default]
    Autonomous,
    /// Report decisions as notifications only
    NotifyOnly,
}

impl fmt::Display for Autonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Autonomy::Autonomous => f.write_str("AUTONOMOUS"),
            Autonomy::NotifyOnly => f.write_str("NOTIFY_ONLY"),
        }
    }
}

impl FromStr for Autonomy {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "AUTONOMOUS" => Ok(Autonomy::Autonomous),
            "NOTIFY_ONLY" | "NOTIFY" => Ok(Autonomy::NotifyOnly),
            other => Err(SignalError::InvalidConfig(format!(
                "unknown autonomy level '{}'",
                other
            ))),
        }
    }
}

/// Similarity index settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Dimension of the built-in hashing embedder
    pub embedding_dimension: usize,
    /// Corpus file loaded at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<PathBuf>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            embedding_dimension: crate::index::embedder::DEFAULT_DIMENSION,
            corpus_path: None,
        }
    }
}

/// Inference runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Execution bound per model invocation (ms)
    pub max_execution_ms: u64,
    /// Model spec loaded at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_spec_path: Option<PathBuf>,
    /// Model artifact loaded at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_artifact_path: Option<PathBuf>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            max_execution_ms: crate::inference::DEFAULT_MAX_EXECUTION.as_millis() as u64,
            model_spec_path: None,
            model_artifact_path: None,
        }
    }
}

/// Per-source queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Events that may wait behind an in-flight cycle, per source
    pub capacity_per_source: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity_per_source: 16,
        }
    }
}

/// Output stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Buffered dispositions before dispatch applies backpressure
    pub action_buffer: usize,
    /// Longest a cycle waits for room in the action stream (ms)
    pub action_dispatch_timeout_ms: u64,
    /// Buffered sync records; a full buffer defers the sync
    pub sync_buffer: usize,
    /// Buffered operational events per subscriber
    pub ops_buffer: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            action_buffer: 64,
            action_dispatch_timeout_ms: 50,
            sync_buffer: 256,
            ops_buffer: crate::ops::DEFAULT_OPS_CAPACITY,
        }
    }
}

/// Complete loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Decision budget (ms)
    pub deadline_ms: u64,

    /// Autonomy level
    pub autonomy: Autonomy,

    /// Action issued when a decision attempt misses its deadline or fails
    pub failsafe_action: ActionTemplate,

    /// Decision policy
    pub policy: PolicyConfig,

    /// Delta Gate
    pub delta: DeltaConfig,

    /// Similarity index
    pub index: IndexSettings,

    /// Inference runner
    pub inference: InferenceSettings,

    /// Per-source queues
    pub queue: QueueSettings,

    /// Output streams
    pub output: OutputSettings,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            deadline_ms: crate::supervisor::DEFAULT_BUDGET.as_millis() as u64,
            autonomy: Autonomy::default(),
            failsafe_action: ActionTemplate::new("PAUSE"),
            policy: PolicyConfig::default(),
            delta: DeltaConfig::default(),
            index: IndexSettings::default(),
            inference: InferenceSettings::default(),
            queue: QueueSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl LoopConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline budget
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Set the autonomy level
    pub fn with_autonomy(mut self, autonomy: Autonomy) -> Self {
        self.autonomy = autonomy;
        self
    }

    /// Set the fail-safe action
    pub fn with_failsafe(mut self, action: ActionTemplate) -> Self {
        self.failsafe_action = action;
        self
    }

    /// Set the policy configuration
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Set the Delta Gate configuration
    pub fn with_delta(mut self, delta: DeltaConfig) -> Self {
        self.delta = delta;
        self
    }

    /// Set the per-source queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue.capacity_per_source = capacity;
        self
    }

    /// Set the hashing embedder dimension
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.index.embedding_dimension = dimension;
        self
    }

    /// Set the model execution bound
    pub fn with_max_execution_ms(mut self, ms: u64) -> Self {
        self.inference.max_execution_ms = ms;
        self
    }

    /// Decision budget as a duration
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Model execution bound as a duration
    pub fn max_execution(&self) -> Duration {
        Duration::from_millis(self.inference.max_execution_ms)
    }

    /// Action dispatch timeout as a duration
    pub fn action_dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.output.action_dispatch_timeout_ms)
    }

    /// Load from a TOML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(SignalError::from)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Save to a TOML or JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => toml::to_string_pretty(self).map_err(|e| SignalError::Serialization(e.to_string()))?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `.env`, the optional file and environment overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIGNAL_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_DEADLINE_MS) {
            self.deadline_ms = parse_env(ENV_DEADLINE_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_AUTONOMY) {
            self.autonomy = v.parse()?;
        }
        if let Some(v) = lookup(ENV_ACCEPTANCE_THRESHOLD) {
            self.policy.acceptance_threshold = parse_env(ENV_ACCEPTANCE_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue.capacity_per_source = parse_env(ENV_QUEUE_CAPACITY, &v)?;
        }
        Ok(())
    }

    /// Check the whole configuration for consistency
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.delta.validate()?;

        if !self.policy.is_allowed(&self.failsafe_action.action) {
            return Err(SignalError::InvalidConfig(format!(
                "fail-safe action '{}' is not allow-listed",
                self.failsafe_action.action
            )));
        }
        if self.deadline_ms == 0 {
            return Err(SignalError::InvalidConfig("deadline_ms must be positive".to_string()));
        }
        if self.inference.max_execution_ms == 0 {
            return Err(SignalError::InvalidConfig(
                "inference.max_execution_ms must be positive".to_string(),
            ));
        }
        if self.queue.capacity_per_source == 0 {
            return Err(SignalError::InvalidConfig(
                "queue.capacity_per_source must be positive".to_string(),
            ));
        }
        if self.index.embedding_dimension == 0 {
            return Err(SignalError::InvalidConfig(
                "index.embedding_dimension must be positive".to_string(),
            ));
        }
        if self.output.action_buffer == 0 || self.output.sync_buffer == 0 {
            return Err(SignalError::InvalidConfig(
                "output buffers must be positive".to_string(),
            ));
        }
        if self.inference.model_spec_path.is_some() != self.inference.model_artifact_path.is_some() {
            return Err(SignalError::InvalidConfig(
                "model_spec_path and model_artifact_path must be given together".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SignalError::InvalidConfig(format!("{}: cannot parse '{}'", key, raw)))
}

//! # Inference Runner
//!
//! Executes the loaded predictive model on a fixed-shape input (soft sensing).
//!
//! - Input channels are validated against the model's declared schema before
//!   anything runs (`SchemaMismatch`).
//! - The model runs on the blocking pool under the runner's own execution
//!   bound; overrun, model error or panic all surface as `InferenceFailure`.
//! - Outputs are checked against their physics ranges: out-of-range values are
//!   clamped and tagged, NaN and infinities are flagged.
//! - Model reload is an atomic swap; a failed load keeps the previous model.

pub mod constraints;
pub mod model;

pub use constraints::ValueRange;
pub use model::{Activation, LinearModel, LoadedModel, ModelKind, ModelSpec, PredictiveModel};

use crate::error::{Result, SignalError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Default execution bound for one model invocation
pub const DEFAULT_MAX_EXECUTION: Duration = Duration::from_millis(150);

/// Named channel readings fed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InferenceInput {
    /// Ordered `(channel, value)` pairs
    pub channels: Vec<(String, f64)>,
}

impl InferenceInput {
    /// Build from ordered pairs
    pub fn new(channels: Vec<(String, f64)>) -> Self {
        Self { channels }
    }

    /// Build from a keyed map
    pub fn from_map(map: &BTreeMap<String, f64>) -> Self {
        Self {
            channels: map.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Add one channel reading
    pub fn with(mut self, channel: impl Into<String>, value: f64) -> Self {
        self.channels.push((channel.into(), value));
        self
    }

    /// Values reordered to `expected`, or `SchemaMismatch`
    pub fn align(&self, expected: &[String]) -> Result<Vec<f64>> {
        if self.channels.len() != expected.len() {
            return Err(SignalError::SchemaMismatch(format!(
                "expected {} channels {:?}, got {}",
                expected.len(),
                expected,
                self.channels.len()
            )));
        }

        let mut by_name: BTreeMap<&str, f64> = BTreeMap::new();
        for (name, value) in &self.channels {
            if by_name.insert(name.as_str(), *value).is_some() {
                return Err(SignalError::SchemaMismatch(format!(
                    "channel '{}' supplied more than once",
                    name
                )));
            }
        }

        let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
        let unexpected: Vec<&str> = by_name
            .keys()
            .copied()
            .filter(|k| !expected_set.contains(k))
            .collect();
        if !unexpected.is_empty() {
            return Err(SignalError::SchemaMismatch(format!(
                "unexpected channels {:?}",
                unexpected
            )));
        }

        expected
            .iter()
            .map(|name| {
                by_name.get(name.as_str()).copied().ok_or_else(|| {
                    SignalError::SchemaMismatch(format!("missing channel '{}'", name))
                })
            })
            .collect()
    }
}

/// One derived quantity after constraint checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedValue {
    /// Output name
    pub name: String,
    /// Value after clamping
    pub value: f64,
    /// Value as produced by the model
    pub raw: f64,
    /// Value was clamped onto a bound
    pub clamped: bool,
    /// Value could not be validated (NaN or infinite) and must not drive decisions
    pub flagged: bool,
    /// Range that was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
}

/// Model outputs with the applied constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    /// Model that produced the values
    pub model_id: String,
    /// One entry per declared target
    pub values: Vec<DerivedValue>,
}

impl InferenceOutput {
    /// Look up a derived value by name
    pub fn get(&self, name: &str) -> Option<&DerivedValue> {
        self.values.iter().find(|v| v.name == name)
    }

    /// Whether any value was clamped
    pub fn any_clamped(&self) -> bool {
        self.values.iter().any(|v| v.clamped)
    }

    /// Whether any value was flagged
    pub fn any_flagged(&self) -> bool {
        self.values.iter().any(|v| v.flagged)
    }
}

/// Holds the active model and runs it under an execution bound
#[derive(Debug)]
pub struct InferenceRunner {
    active: RwLock<Option<Arc<LoadedModel>>>,
    max_execution: Duration,
}

impl InferenceRunner {
    /// Runner with no model loaded
    pub fn new(max_execution: Duration) -> Self {
        Self {
            active: RwLock::new(None),
            max_execution,
        }
    }

    /// Runner with `model` loaded
    pub fn with_model(model: LoadedModel, max_execution: Duration) -> Self {
        let runner = Self::new(max_execution);
        runner.load(model);
        runner
    }

    /// Execution bound per invocation
    pub fn max_execution(&self) -> Duration {
        self.max_execution
    }

    /// Swap in a new model, returning the previous one
    pub fn load(&self, model: LoadedModel) -> Option<Arc<LoadedModel>> {
        tracing::info!(
            "Inference model loaded: {} ({} channels → {} targets)",
            model.id(),
            model.spec().input_channels.len(),
            model.spec().targets.len()
        );
        self.active.write().replace(Arc::new(model))
    }

    /// Remove the active model
    pub fn unload(&self) -> Option<Arc<LoadedModel>> {
        self.active.write().take()
    }

    /// The active model, if any
    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.active.read().clone()
    }

    /// Run the active model on `input`
    pub async fn infer(&self, input: InferenceInput) -> Result<InferenceOutput> {
        let model = self
            .current()
            .ok_or_else(|| SignalError::InferenceFailure("no model loaded".to_string()))?;
        Self::run(model, input, self.max_execution).await
    }

    /// Run an explicit model snapshot on `input`
    pub async fn run(
        loaded: Arc<LoadedModel>,
        input: InferenceInput,
        max_execution: Duration,
    ) -> Result<InferenceOutput> {
        let values = input.align(&loaded.spec().input_channels)?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SignalError::SchemaMismatch(
                "input contains non-finite values".to_string(),
            ));
        }

        let model = loaded.model();
        let task = tokio::task::spawn_blocking(move || model.predict(&values));

        let raw = match tokio::time::timeout(max_execution, task).await {
            Ok(Ok(Ok(raw))) => raw,
            Ok(Ok(Err(fault))) => {
                return Err(SignalError::InferenceFailure(format!(
                    "model '{}' failed: {}",
                    loaded.id(),
                    fault
                )))
            }
            Ok(Err(join_err)) => {
                return Err(SignalError::InferenceFailure(format!(
                    "model '{}' panicked: {}",
                    loaded.id(),
                    join_err
                )))
            }
            Err(_) => {
                return Err(SignalError::InferenceFailure(format!(
                    "model '{}' exceeded execution bound of {}ms",
                    loaded.id(),
                    max_execution.as_millis()
                )))
            }
        };

        let targets = &loaded.spec().targets;
        if raw.len() != targets.len() {
            return Err(SignalError::InferenceFailure(format!(
                "model '{}' returned {} values for {} targets",
                loaded.id(),
                raw.len(),
                targets.len()
            )));
        }

        let values = targets
            .iter()
            .zip(raw)
            .map(|(name, raw)| {
                let range = loaded.range(name).copied();
                let checked = range.unwrap_or_default().apply(raw);
                if checked.clamped {
                    tracing::debug!(
                        "Clamped {} from {} to {} ({})",
                        name,
                        raw,
                        checked.value,
                        loaded.id()
                    );
                }
                if checked.flagged {
                    tracing::warn!("Model {} produced non-finite {} for {}", loaded.id(), raw, name);
                }
                DerivedValue {
                    name: name.clone(),
                    value: checked.value,
                    raw,
                    clamped: checked.clamped,
                    flagged: checked.flagged,
                    range,
                }
            })
            .collect();

        Ok(InferenceOutput {
            model_id: loaded.id().to_string(),
            values,
        })
    }
}

impl Default for InferenceRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXECUTION)
    }
}

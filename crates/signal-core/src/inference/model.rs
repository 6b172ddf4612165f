//! Model specs, the predictive model seam and the built-in linear artifact

use super::constraints::{parse_constraints, ValueRange};
use crate::error::{Result, SignalError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// A loaded predictive model. Implementations must be pure with respect to
/// shared state; the runner executes them on the blocking pool.
pub trait PredictiveModel: Send + Sync + Debug {
    /// Map one input row (ordered per the spec's channels) to one value per target
    fn predict(&self, input: &[f64]) -> std::result::Result<Vec<f64>, String>;
}

/// What kind of quantity the model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Continuous quantities (soft sensing)
    #[default]
    Regression,
    /// Class probabilities, implicitly bounded to [0, 1]
    Classification,
}

/// Declared schema of a model, supplied by the model-loading collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier, e.g. `model_titer_pred_v2`
    pub id: String,

    /// Ordered input channels, e.g. `["temperature", "ph", "agitation"]`
    pub input_channels: Vec<String>,

    /// Output names, e.g. `["titer_g_l"]`
    pub targets: Vec<String>,

    /// Physics constraints, `min_<target>` / `max_<target>` → bound
    #[serde(default)]
    pub physics_constraints: BTreeMap<String, f64>,

    /// Regression or classification
    #[serde(default)]
    pub kind: ModelKind,
}

impl ModelSpec {
    /// Read a spec from a JSON or TOML file (by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SignalError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| e.to_string()),
            _ => serde_json::from_str(&content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| SignalError::ModelLoad(format!("{}: {}", path.display(), e)))
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SignalError::ModelLoad("model id is empty".to_string()));
        }
        check_names("input channel", &self.input_channels)?;
        check_names("target", &self.targets)?;
        Ok(())
    }
}

fn check_names(what: &str, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(SignalError::ModelLoad(format!("model declares no {}s", what)));
    }
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(SignalError::ModelLoad(format!("empty {} name", what)));
        }
        if !seen.insert(name.as_str()) {
            return Err(SignalError::ModelLoad(format!("duplicate {} '{}'", what, name)));
        }
    }
    Ok(())
}

/// Activation applied to each linear output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Raw affine output
    #[default]
    Identity,
    /// Logistic function
    Sigmoid,
}

/// Linear (optionally logistic) model artifact: `y = act(W·x + b)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// One weight row per target, one column per input channel
    pub weights: Vec<Vec<f64>>,
    /// One bias per target
    pub bias: Vec<f64>,
    /// Output activation
    #[serde(default)]
    pub activation: Activation,
}

impl LinearModel {
    /// Parse a JSON artifact
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SignalError::ModelLoad(format!("malformed linear artifact: {}", e)))
    }

    fn check_shape(&self, spec: &ModelSpec) -> Result<()> {
        if self.weights.len() != spec.targets.len() || self.bias.len() != spec.targets.len() {
            return Err(SignalError::ModelLoad(format!(
                "artifact has {} weight rows / {} biases, spec '{}' declares {} targets",
                self.weights.len(),
                self.bias.len(),
                spec.id,
                spec.targets.len()
            )));
        }
        for (i, row) in self.weights.iter().enumerate() {
            if row.len() != spec.input_channels.len() {
                return Err(SignalError::ModelLoad(format!(
                    "weight row {} has {} columns, spec '{}' declares {} channels",
                    i,
                    row.len(),
                    spec.id,
                    spec.input_channels.len()
                )));
            }
        }
        if self
            .weights
            .iter()
            .flatten()
            .chain(self.bias.iter())
            .any(|v| !v.is_finite())
        {
            return Err(SignalError::ModelLoad("artifact has non-finite parameters".to_string()));
        }
        Ok(())
    }
}

impl PredictiveModel for LinearModel {
    fn predict(&self, input: &[f64]) -> std::result::Result<Vec<f64>, String> {
        self.weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| {
                if row.len() != input.len() {
                    return Err(format!(
                        "input has {} values, weight row expects {}",
                        input.len(),
                        row.len()
                    ));
                }
                let z: f64 = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b;
                Ok(match self.activation {
                    Activation::Identity => z,
                    Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
                })
            })
            .collect()
    }
}

/// A validated model ready for the runner
#[derive(Debug, Clone)]
pub struct LoadedModel {
    spec: ModelSpec,
    ranges: BTreeMap<String, ValueRange>,
    model: Arc<dyn PredictiveModel>,
}

impl LoadedModel {
    /// Validate `spec`, bind its constraints and pair it with `model`
    pub fn new(spec: ModelSpec, model: Arc<dyn PredictiveModel>) -> Result<Self> {
        spec.validate()?;
        let mut ranges = parse_constraints(&spec.targets, &spec.physics_constraints)?;

        if spec.kind == ModelKind::Classification {
            for target in &spec.targets {
                let range = ranges.entry(target.clone()).or_default();
                range.min = Some(range.min.map_or(0.0, |m| m.max(0.0)));
                range.max = Some(range.max.map_or(1.0, |m| m.min(1.0)));
            }
        }

        Ok(Self {
            spec,
            ranges,
            model,
        })
    }

    /// Build from a spec plus a JSON linear artifact
    pub fn from_linear_artifact(spec: ModelSpec, artifact: &[u8]) -> Result<Self> {
        if artifact.is_empty() {
            return Err(SignalError::ModelLoad("model artifact is empty".to_string()));
        }
        let linear = LinearModel::from_bytes(artifact)?;
        linear.check_shape(&spec)?;
        Self::new(spec, Arc::new(linear))
    }

    /// Load spec and artifact from disk
    pub fn from_files(spec_path: impl AsRef<Path>, artifact_path: impl AsRef<Path>) -> Result<Self> {
        let spec = ModelSpec::from_file(spec_path)?;
        let artifact_path = artifact_path.as_ref();
        let artifact = std::fs::read(artifact_path)
            .map_err(|e| SignalError::ModelLoad(format!("{}: {}", artifact_path.display(), e)))?;
        Self::from_linear_artifact(spec, &artifact)
    }

    /// Declared schema
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Model identifier
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Range bound to `target`, if any
    pub fn range(&self, target: &str) -> Option<&ValueRange> {
        self.ranges.get(target)
    }

    pub(crate) fn model(&self) -> Arc<dyn PredictiveModel> {
        self.model.clone()
    }
}

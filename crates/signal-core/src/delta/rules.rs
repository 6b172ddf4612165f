//! Thresholds and fact promotion rules

use crate::error::{Result, SignalError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Change below which a relative threshold treats a zero baseline as unchanged
pub const RELATIVE_ZERO_EPSILON: f64 = 1e-6;

/// Minimum change required before a field is re-emitted.
///
/// Written as a bare number (`ph = 0.3`) for an absolute delta or as
/// `{ relative = 0.05 }` for a fraction of the last emitted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    /// `|new - last| > delta`
    Absolute(f64),
    /// `|new - last| / |last| > relative`
    Relative {
        /// Fraction of the last emitted value
        relative: f64,
    },
}

impl Threshold {
    /// Whether moving from `last` to `new` is a material change.
    /// Both values must be finite.
    pub fn exceeded(&self, last: f64, new: f64) -> bool {
        let delta = (new - last).abs();
        match *self {
            Threshold::Absolute(limit) => delta > limit,
            Threshold::Relative { relative } => {
                if last == 0.0 {
                    delta > RELATIVE_ZERO_EPSILON
                } else {
                    delta / last.abs() > relative
                }
            }
        }
    }

    fn raw(&self) -> f64 {
        match *self {
            Threshold::Absolute(v) => v,
            Threshold::Relative { relative } => relative,
        }
    }

    /// Reject negative or non-finite limits
    pub fn validate(&self, field: &str) -> Result<()> {
        let raw = self.raw();
        if !raw.is_finite() || raw < 0.0 {
            return Err(SignalError::InvalidConfig(format!(
                "threshold for '{}' must be finite and non-negative, got {}",
                field, raw
            )));
        }
        Ok(())
    }
}

/// Value range that promotes a reading to a semantic fact
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Strictly below the bound
    Below(f64),
    /// Strictly above the bound
    Above(f64),
    /// Within `[min, max]` inclusive
    Between {
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
}

impl Condition {
    /// Whether `value` satisfies the condition. NaN never matches.
    pub fn matches(&self, value: f64) -> bool {
        match *self {
            Condition::Below(bound) => value < bound,
            Condition::Above(bound) => value > bound,
            Condition::Between { min, max } => value >= min && value <= max,
        }
    }
}

/// Maps a field and value range to a semantic label, e.g. `ph < 6.5 → Acidic_Stress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRule {
    /// Field the rule listens to
    pub field: String,
    /// Range that triggers the label
    pub condition: Condition,
    /// Semantic label carried by the sync record
    pub label: String,
}

impl PromotionRule {
    /// Create a rule
    pub fn new(field: impl Into<String>, condition: Condition, label: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            condition,
            label: label.into(),
        }
    }

    /// Whether the rule fires for `field = value`
    pub fn applies(&self, field: &str, value: f64) -> bool {
        self.field == field && self.condition.matches(value)
    }

    fn validate(&self) -> Result<()> {
        if self.field.trim().is_empty() || self.label.trim().is_empty() {
            return Err(SignalError::InvalidConfig(
                "promotion rule needs a field and a label".to_string(),
            ));
        }
        let bounds_ok = match self.condition {
            Condition::Below(b) | Condition::Above(b) => b.is_finite(),
            Condition::Between { min, max } => min.is_finite() && max.is_finite() && min <= max,
        };
        if !bounds_ok {
            return Err(SignalError::InvalidConfig(format!(
                "promotion rule '{}' on '{}' has invalid bounds",
                self.label, self.field
            )));
        }
        Ok(())
    }
}

/// Delta Gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeltaConfig {
    /// Per-field thresholds
    pub thresholds: BTreeMap<String, Threshold>,

    /// Threshold for fields without their own; `None` emits on any change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_threshold: Option<Threshold>,

    /// Fact promotion rules
    pub promotion_rules: Vec<PromotionRule>,
}

impl DeltaConfig {
    /// Set a field threshold
    pub fn with_threshold(mut self, field: impl Into<String>, threshold: Threshold) -> Self {
        self.thresholds.insert(field.into(), threshold);
        self
    }

    /// Set the fallback threshold
    pub fn with_default_threshold(mut self, threshold: Threshold) -> Self {
        self.default_threshold = Some(threshold);
        self
    }

    /// Add a promotion rule
    pub fn with_rule(mut self, rule: PromotionRule) -> Self {
        self.promotion_rules.push(rule);
        self
    }

    /// Threshold in force for `field`
    pub fn threshold_for(&self, field: &str) -> Option<Threshold> {
        self.thresholds.get(field).copied().or(self.default_threshold)
    }

    /// Labels of every rule that fires for `field = value`
    pub fn labels_for(&self, field: &str, value: f64) -> Vec<String> {
        self.promotion_rules
            .iter()
            .filter(|rule| rule.applies(field, value))
            .map(|rule| rule.label.clone())
            .collect()
    }

    /// Reject bad thresholds and rules
    pub fn validate(&self) -> Result<()> {
        for (field, threshold) in &self.thresholds {
            threshold.validate(field)?;
        }
        if let Some(default) = &self.default_threshold {
            default.validate("<default>")?;
        }
        for rule in &self.promotion_rules {
            rule.validate()?;
        }
        Ok(())
    }
}

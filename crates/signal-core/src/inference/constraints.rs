//! Physics constraints applied to model outputs

use crate::error::{Result, SignalError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Valid range for one output; either bound may be open
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ValueRange {
    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Result of checking one value against its range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checked {
    /// Value after clamping (non-finite values pass through)
    pub value: f64,
    /// Value was moved onto a bound
    pub clamped: bool,
    /// Value could not be validated (NaN or infinite)
    pub flagged: bool,
}

impl ValueRange {
    /// Range with both bounds
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Whether either bound is set
    pub fn is_bounded(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Clamp `value` to the nearest bound. Non-finite values are flagged,
    /// never clamped, whether or not a bound is declared.
    pub fn apply(&self, value: f64) -> Checked {
        if !value.is_finite() {
            return Checked {
                value,
                clamped: false,
                flagged: true,
            };
        }
        if let Some(min) = self.min {
            if value < min {
                return Checked {
                    value: min,
                    clamped: true,
                    flagged: false,
                };
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Checked {
                    value: max,
                    clamped: true,
                    flagged: false,
                };
            }
        }
        Checked {
            value,
            clamped: false,
            flagged: false,
        }
    }
}

/// Bind `min_*` / `max_*` constraint keys to targets.
///
/// For a single-target model any key starting with `min` or `max` applies to
/// that target. For multi-target models the key must be `min_<target>` or
/// `max_<target>`; anything else is ignored.
pub fn parse_constraints(
    targets: &[String],
    raw: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, ValueRange>> {
    let mut ranges: BTreeMap<String, ValueRange> = BTreeMap::new();

    for (key, bound) in raw {
        let lowered = key.to_ascii_lowercase();
        let (is_min, suffix) = if let Some(rest) = lowered.strip_prefix("min") {
            (true, rest.trim_start_matches('_'))
        } else if let Some(rest) = lowered.strip_prefix("max") {
            (false, rest.trim_start_matches('_'))
        } else {
            tracing::debug!("Ignoring unrecognised physics constraint '{}'", key);
            continue;
        };

        let target = if targets.len() == 1 {
            Some(targets[0].clone())
        } else {
            targets
                .iter()
                .find(|t| t.to_ascii_lowercase() == suffix)
                .cloned()
        };

        let Some(target) = target else {
            tracing::debug!("Constraint '{}' matches no target, ignoring", key);
            continue;
        };

        if !bound.is_finite() {
            return Err(SignalError::ModelLoad(format!(
                "constraint '{}' is not finite",
                key
            )));
        }

        let range = ranges.entry(target).or_default();
        if is_min {
            range.min = Some(*bound);
        } else {
            range.max = Some(*bound);
        }
    }

    for (target, range) in &ranges {
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(SignalError::ModelLoad(format!(
                    "Invalid constraints: min {} > max {} for '{}'",
                    min, max, target
                )));
            }
        }
    }

    Ok(ranges)
}

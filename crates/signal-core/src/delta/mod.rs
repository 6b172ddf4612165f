//! # Delta Gate
//!
//! Suppresses insignificant state changes before they leave the edge and
//! promotes readings that cross configured ranges into semantic facts.
//!
//! Drift is always measured against the last *emitted* value, never the last
//! observed one, so a slow ramp still emits once it accumulates past the
//! threshold. State for a key is written only when an emission is committed;
//! with [`DeltaGate::observe_with`] that means only after delivery succeeded.

pub mod rules;

pub use rules::{Condition, DeltaConfig, PromotionRule, Threshold};

use crate::types::Timestamp;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// A change worth propagating downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Entity, e.g. `Bioreactor-01`
    pub entity: String,
    /// Field, e.g. `ph`
    pub field: String,
    /// Last emitted value; absent on first emission
    pub previous_value: Option<f64>,
    /// Value being emitted
    pub new_value: f64,
    /// Observation time
    pub timestamp: Timestamp,
    /// Whether any promotion rule fired
    pub promoted: bool,
    /// Labels of every rule that fired
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl SyncRecord {
    /// First promoted label, if any
    pub fn label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }
}

/// Last emitted value for one (entity, field)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Value last emitted
    pub value: f64,
    /// Timestamp of that emission
    pub timestamp: Timestamp,
}

/// One reading offered to the gate
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Entity
    pub entity: String,
    /// Field
    pub field: String,
    /// Reading
    pub value: f64,
    /// Reading time
    pub timestamp: Timestamp,
    /// Threshold for this observation only
    pub threshold: Option<Threshold>,
}

impl Observation {
    /// Create an observation
    pub fn new(
        entity: impl Into<String>,
        field: impl Into<String>,
        value: f64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            value,
            timestamp,
            threshold: None,
        }
    }

    /// Override the configured threshold for this observation
    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Delta throttling and fact promotion
#[derive(Debug, Default)]
pub struct DeltaGate {
    config: DeltaConfig,
    state: DashMap<(String, String), StateSnapshot>,
}

impl DeltaGate {
    /// Create a gate with `config`
    pub fn new(config: DeltaConfig) -> Self {
        Self {
            config,
            state: DashMap::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &DeltaConfig {
        &self.config
    }

    /// Offer a reading; returns the record if it is a material change
    pub fn observe(
        &self,
        entity: &str,
        field: &str,
        value: f64,
        timestamp: Timestamp,
    ) -> Option<SyncRecord> {
        let observation = Observation::new(entity, field, value, timestamp);
        match self.observe_with(observation, |_| Ok::<(), Infallible>(())) {
            Ok(record) => record,
            Err(never) => match never {},
        }
    }

    /// Offer a reading and hand any resulting record to `deliver`.
    ///
    /// State is committed only if `deliver` returns `Ok`; on `Err` the gate
    /// behaves as if nothing was emitted, so the next observation retries.
    /// `deliver` runs while the key's shard is locked and must not block.
    pub fn observe_with<F, E>(&self, observation: Observation, deliver: F) -> Result<Option<SyncRecord>, E>
    where
        F: FnOnce(&SyncRecord) -> Result<(), E>,
    {
        let Observation {
            entity,
            field,
            value,
            timestamp,
            threshold,
        } = observation;
        let threshold = threshold.or_else(|| self.config.threshold_for(&field));

        match self.state.entry((entity.clone(), field.clone())) {
            Entry::Occupied(mut slot) => {
                let last = *slot.get();
                if timestamp < last.timestamp {
                    tracing::debug!(
                        "Ignoring out-of-order reading {}.{} at {} (last emitted {})",
                        entity,
                        field,
                        timestamp,
                        last.timestamp
                    );
                    return Ok(None);
                }
                if !is_material(last.value, value, threshold) {
                    tracing::debug!("Throttled update for {}.{}: {}", entity, field, value);
                    return Ok(None);
                }

                let record = self.record(entity, field, Some(last.value), value, timestamp);
                deliver(&record)?;
                slot.insert(StateSnapshot { value, timestamp });
                Ok(Some(record))
            }
            Entry::Vacant(slot) => {
                let record = self.record(entity, field, None, value, timestamp);
                deliver(&record)?;
                slot.insert(StateSnapshot { value, timestamp });
                Ok(Some(record))
            }
        }
    }

    /// Last emitted state for a key
    pub fn last_emitted(&self, entity: &str, field: &str) -> Option<StateSnapshot> {
        self.state
            .get(&(entity.to_string(), field.to_string()))
            .map(|entry| *entry.value())
    }

    /// Number of tracked keys
    pub fn tracked(&self) -> usize {
        self.state.len()
    }

    /// Drop the state for a key so the next reading emits unconditionally
    pub fn forget(&self, entity: &str, field: &str) -> Option<StateSnapshot> {
        self.state
            .remove(&(entity.to_string(), field.to_string()))
            .map(|(_, snapshot)| snapshot)
    }

    fn record(
        &self,
        entity: String,
        field: String,
        previous_value: Option<f64>,
        new_value: f64,
        timestamp: Timestamp,
    ) -> SyncRecord {
        let labels = self.config.labels_for(&field, new_value);
        if !labels.is_empty() {
            tracing::info!(
                "Promoted {}.{} = {} to {}",
                entity,
                field,
                new_value,
                labels.join(", ")
            );
        }
        SyncRecord {
            entity,
            field,
            previous_value,
            new_value,
            timestamp,
            promoted: !labels.is_empty(),
            labels,
        }
    }
}

fn is_material(last: f64, new: f64, threshold: Option<Threshold>) -> bool {
    if !last.is_finite() || !new.is_finite() {
        // NaN -> NaN and Inf -> same Inf are repeats; any other transition counts
        return !(last.is_nan() && new.is_nan()) && last != new;
    }
    match threshold {
        Some(threshold) => threshold.exceeded(last, new),
        None => new != last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn t(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn ph_gate() -> DeltaGate {
        DeltaGate::new(
            DeltaConfig::default()
                .with_threshold("ph", Threshold::Absolute(0.3))
                .with_rule(PromotionRule::new("ph", Condition::Below(6.5), "Acidic_Stress")),
        )
    }

    #[test]
    fn test_acidic_stress_promotion() {
        let gate = ph_gate();

        let first = gate.observe("Bioreactor-01", "ph", 7.0, t(0)).unwrap();
        assert_eq!(first.previous_value, None);
        assert!(!first.promoted);

        let record = gate.observe("Bioreactor-01", "ph", 6.4, t(1)).unwrap();
        assert_eq!(record.field, "ph");
        assert_eq!(record.previous_value, Some(7.0));
        assert_eq!(record.new_value, 6.4);
        assert!(record.promoted);
        assert_eq!(record.label(), Some("Acidic_Stress"));
    }

    #[test]
    fn test_small_changes_suppressed() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(0)).unwrap();
        assert!(gate.observe("B1", "ph", 7.2, t(1)).is_none());
        assert!(gate.observe("B1", "ph", 6.8, t(2)).is_none());
        assert_eq!(gate.last_emitted("B1", "ph").unwrap().value, 7.0);
    }

    #[test]
    fn test_drift_measured_from_last_emission() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(0)).unwrap();
        assert!(gate.observe("B1", "ph", 7.2, t(1)).is_none());
        // 7.4 is only 0.2 from the last observation but 0.4 from the last emission
        let record = gate.observe("B1", "ph", 7.4, t(2)).unwrap();
        assert_eq!(record.previous_value, Some(7.0));
    }

    #[test]
    fn test_unchanged_never_reemits() {
        let gate = DeltaGate::default();
        assert!(gate.observe("B1", "temp", 37.0, t(0)).is_some());
        assert!(gate.observe("B1", "temp", 37.0, t(1)).is_none());
        assert!(gate.observe("B1", "temp", 37.0, t(1)).is_none());
        assert!(gate.observe("B1", "temp", 37.01, t(2)).is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let gate = ph_gate();
        assert!(gate.observe("B1", "ph", 7.0, t(0)).is_some());
        assert!(gate.observe("B2", "ph", 7.0, t(0)).is_some());
        assert!(gate.observe("B1", "temp", 7.0, t(0)).is_some());
        assert_eq!(gate.tracked(), 3);
    }

    #[test]
    fn test_non_finite_transitions() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(0)).unwrap();
        assert!(gate.observe("B1", "ph", f64::NAN, t(1)).is_some());
        assert!(gate.observe("B1", "ph", f64::NAN, t(2)).is_none());
        assert!(gate.observe("B1", "ph", 7.0, t(3)).is_some());
        assert!(gate.observe("B1", "ph", f64::INFINITY, t(4)).is_some());
        assert!(gate.observe("B1", "ph", f64::INFINITY, t(5)).is_none());
        assert!(gate.observe("B1", "ph", f64::NEG_INFINITY, t(6)).is_some());
    }

    #[test]
    fn test_out_of_order_ignored() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(10)).unwrap();
        assert!(gate.observe("B1", "ph", 5.0, t(5)).is_none());
        assert_eq!(gate.last_emitted("B1", "ph").unwrap().timestamp, t(10));
    }

    #[test]
    fn test_observation_threshold_override() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(0)).unwrap();
        let obs = Observation::new("B1", "ph", 7.1, t(1)).with_threshold(Threshold::Absolute(0.05));
        let record = gate.observe_with(obs, |_| Ok::<(), ()>(())).unwrap();
        assert!(record.is_some());
    }

    #[test]
    fn test_failed_delivery_does_not_commit() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(0)).unwrap();

        let obs = Observation::new("B1", "ph", 6.0, t(1));
        let result = gate.observe_with(obs, |_| Err("sync stream full"));
        assert_eq!(result, Err("sync stream full"));
        assert_eq!(gate.last_emitted("B1", "ph").unwrap().value, 7.0);

        // Retried on the next observation rather than throttled
        let record = gate.observe("B1", "ph", 6.0, t(2)).unwrap();
        assert_eq!(record.previous_value, Some(7.0));
    }

    #[test]
    fn test_failed_first_delivery_leaves_key_untracked() {
        let gate = ph_gate();
        let obs = Observation::new("B1", "ph", 7.0, t(0));
        assert!(gate.observe_with(obs, |_| Err(())).is_err());
        assert!(gate.last_emitted("B1", "ph").is_none());
    }

    #[test]
    fn test_multiple_labels() {
        let gate = DeltaGate::new(
            DeltaConfig::default()
                .with_rule(PromotionRule::new("ph", Condition::Below(6.5), "Acidic_Stress"))
                .with_rule(PromotionRule::new("ph", Condition::Below(6.0), "Critical_Acidity")),
        );
        let record = gate.observe("B1", "ph", 5.5, t(0)).unwrap();
        assert_eq!(record.labels, vec!["Acidic_Stress", "Critical_Acidity"]);
    }

    #[test]
    fn test_forget_resets_key() {
        let gate = ph_gate();
        gate.observe("B1", "ph", 7.0, t(0)).unwrap();
        assert!(gate.forget("B1", "ph").is_some());
        assert!(gate.observe("B1", "ph", 7.0, t(1)).is_some());
    }

    proptest! {
        #[test]
        fn prop_emissions_track_last_emitted(
            values in prop::collection::vec(-10.0f64..10.0, 1..60),
            threshold in 0.0f64..2.0,
        ) {
            let gate = DeltaGate::new(
                DeltaConfig::default().with_threshold("x", Threshold::Absolute(threshold)),
            );
            let mut expected_last: Option<f64> = None;

            for (i, value) in values.iter().enumerate() {
                let emitted = gate.observe("e", "x", *value, t(i as i64));
                let should = match expected_last {
                    None => true,
                    Some(last) => (value - last).abs() > threshold,
                };
                prop_assert_eq!(emitted.is_some(), should);
                if let Some(record) = emitted {
                    prop_assert_eq!(record.previous_value, expected_last);
                    expected_last = Some(*value);
                }
                // Re-offering the same reading is always suppressed
                prop_assert!(gate.observe("e", "x", *value, t(i as i64)).is_none());
            }
        }

        #[test]
        fn prop_oscillation_within_threshold_is_silent(
            base in -100.0f64..100.0,
            wiggles in prop::collection::vec(-0.49f64..0.49, 1..40),
        ) {
            let gate = DeltaGate::new(
                DeltaConfig::default().with_threshold("x", Threshold::Absolute(0.5)),
            );
            prop_assert!(gate.observe("e", "x", base, t(0)).is_some());
            for (i, w) in wiggles.iter().enumerate() {
                prop_assert!(gate.observe("e", "x", base + w, t(i as i64 + 1)).is_none());
            }
        }
    }
}

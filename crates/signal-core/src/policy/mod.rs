//! # Decision Policy
//!
//! Maps (event, retrieved procedures, derived quantities) to at most one
//! action. Pure and synchronous: no I/O, no clock reads beyond stamping the
//! decision, no shared state.
//!
//! Rules, in order:
//! 1. Severity below the configured minimum yields no action.
//! 2. The best match above the acceptance threshold with a recommended action
//!    wins (`MODEL`); otherwise the severity tier default applies
//!    (`POLICY_DEFAULT`), or the escalation action if the tier has none.
//! 3. Inference triggers may raise the tier, never lower it.
//! 4. Anything off the allow-list is replaced by the escalation action.

pub mod action;

pub use action::{ActionDecision, ActionTemplate, ParamValue, Parameters, Provenance};

use crate::error::{Result, SignalError};
use crate::index::ScoredReference;
use crate::inference::InferenceOutput;
use crate::types::{Event, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default acceptance threshold for retrieved procedures
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.5;

/// Default number of neighbours retrieved per event
pub const DEFAULT_TOP_K: usize = 3;

/// Default action for each severity tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TierDefaults {
    /// INFO tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ActionTemplate>,
    /// WARN tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn: Option<ActionTemplate>,
    /// ERROR tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionTemplate>,
    /// CRITICAL tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<ActionTemplate>,
}

impl TierDefaults {
    /// Default for `tier`, if configured
    pub fn get(&self, tier: Severity) -> Option<&ActionTemplate> {
        match tier {
            Severity::Info => self.info.as_ref(),
            Severity::Warn => self.warn.as_ref(),
            Severity::Error => self.error.as_ref(),
            Severity::Critical => self.critical.as_ref(),
        }
    }

    /// Set the default for `tier`
    pub fn set(&mut self, tier: Severity, template: ActionTemplate) {
        let slot = match tier {
            Severity::Info => &mut self.info,
            Severity::Warn => &mut self.warn,
            Severity::Error => &mut self.error,
            Severity::Critical => &mut self.critical,
        };
        *slot = Some(template);
    }

    /// All configured `(tier, template)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (Severity, &ActionTemplate)> {
        Severity::ALL
            .into_iter()
            .filter_map(move |tier| self.get(tier).map(|t| (tier, t)))
    }
}

/// Raises the tier when a derived quantity crosses a limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceTrigger {
    /// Output name, e.g. `titer_g_l`
    pub output: String,

    /// Fires when the value is strictly above this limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub above: Option<f64>,

    /// Fires when the value is strictly below this limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<f64>,

    /// Tier to raise to
    pub raise_to: Severity,
}

impl InferenceTrigger {
    /// Check the trigger against `output`. Flagged values never fire.
    pub fn fires(&self, output: &InferenceOutput) -> Option<f64> {
        let value = output.get(&self.output)?;
        if value.flagged {
            return None;
        }
        let crossed = self.above.map_or(false, |limit| value.value > limit)
            || self.below.map_or(false, |limit| value.value < limit);
        crossed.then_some(value.value)
    }
}

/// Policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Closed set of action names this deployment may emit
    pub allowed_actions: BTreeSet<String>,

    /// Events below this severity produce no action
    pub min_severity: Severity,

    /// Match score must be strictly above this to use a retrieved procedure
    pub acceptance_threshold: f32,

    /// Neighbours retrieved per event
    pub top_k: usize,

    /// Default action per severity tier
    pub tier_defaults: TierDefaults,

    /// Escalate-to-human action; replaces disallowed actions
    pub escalation_action: ActionTemplate,

    /// Inference-driven tier raises
    pub inference_triggers: Vec<InferenceTrigger>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mut tier_defaults = TierDefaults::default();
        tier_defaults.set(Severity::Warn, ActionTemplate::new("NOTIFY"));
        tier_defaults.set(Severity::Error, ActionTemplate::new("PAUSE"));
        tier_defaults.set(Severity::Critical, ActionTemplate::new("ABORT"));

        Self {
            allowed_actions: ["RETRY", "PAUSE", "ABORT", "NOTIFY", "IGNORE"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_severity: Severity::Error,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            tier_defaults,
            escalation_action: ActionTemplate::new("NOTIFY"),
            inference_triggers: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Whether `action` is on the allow-list
    pub fn is_allowed(&self, action: &str) -> bool {
        self.allowed_actions.contains(action)
    }

    /// Replace the allow-list
    pub fn with_allowed_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum severity
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Set the acceptance threshold
    pub fn with_acceptance_threshold(mut self, threshold: f32) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    /// Set a tier default
    pub fn with_tier_default(mut self, tier: Severity, template: ActionTemplate) -> Self {
        self.tier_defaults.set(tier, template);
        self
    }

    /// Set the escalation action
    pub fn with_escalation_action(mut self, template: ActionTemplate) -> Self {
        self.escalation_action = template;
        self
    }

    /// Add an inference trigger
    pub fn with_trigger(mut self, trigger: InferenceTrigger) -> Self {
        self.inference_triggers.push(trigger);
        self
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.allowed_actions.is_empty() {
            return Err(SignalError::InvalidConfig("allow-list is empty".to_string()));
        }
        if !self.is_allowed(&self.escalation_action.action) {
            return Err(SignalError::InvalidConfig(format!(
                "escalation action '{}' is not allow-listed",
                self.escalation_action.action
            )));
        }
        for (tier, template) in self.tier_defaults.iter() {
            if !self.is_allowed(&template.action) {
                return Err(SignalError::InvalidConfig(format!(
                    "{} tier default '{}' is not allow-listed",
                    tier, template.action
                )));
            }
        }
        if !self.acceptance_threshold.is_finite() || !(-1.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(SignalError::InvalidConfig(format!(
                "acceptance threshold {} is outside [-1, 1]",
                self.acceptance_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(SignalError::InvalidConfig("top_k must be at least 1".to_string()));
        }
        for trigger in &self.inference_triggers {
            if trigger.output.trim().is_empty() {
                return Err(SignalError::InvalidConfig("trigger with empty output name".to_string()));
            }
            let limits = [trigger.above, trigger.below];
            if limits.iter().all(Option::is_none) {
                return Err(SignalError::InvalidConfig(format!(
                    "trigger on '{}' has no limit",
                    trigger.output
                )));
            }
            if limits.iter().flatten().any(|l| !l.is_finite()) {
                return Err(SignalError::InvalidConfig(format!(
                    "trigger on '{}' has a non-finite limit",
                    trigger.output
                )));
            }
        }
        Ok(())
    }
}

/// Result of one policy evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// An allow-listed action was chosen
    Action(ActionDecision),
    /// The event does not warrant an action
    NoAction,
}

impl PolicyOutcome {
    /// The decision, if any
    pub fn decision(&self) -> Option<&ActionDecision> {
        match self {
            PolicyOutcome::Action(decision) => Some(decision),
            PolicyOutcome::NoAction => None,
        }
    }

    /// Consume into the decision, if any
    pub fn into_decision(self) -> Option<ActionDecision> {
        match self {
            PolicyOutcome::Action(decision) => Some(decision),
            PolicyOutcome::NoAction => None,
        }
    }
}

/// Record of an allow-list substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// Action that was rejected
    pub rejected: String,
    /// Action that replaced it
    pub replacement: String,
}

/// The decision policy
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    /// Create a policy from a validated configuration
    pub fn new(config: PolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Whether `action` is on the allow-list
    pub fn is_allowed(&self, action: &str) -> bool {
        self.config.is_allowed(action)
    }

    /// Decide for one event
    pub fn decide(
        &self,
        event: &Event,
        matches: &[ScoredReference],
        inference: Option<&InferenceOutput>,
    ) -> PolicyOutcome {
        self.decide_traced(event, matches, inference).0
    }

    /// Decide for one event, also reporting any allow-list substitution
    pub fn decide_traced(
        &self,
        event: &Event,
        matches: &[ScoredReference],
        inference: Option<&InferenceOutput>,
    ) -> (PolicyOutcome, Option<Substitution>) {
        if event.severity < self.config.min_severity {
            tracing::debug!(
                "Event {} below minimum severity ({} < {})",
                event.id,
                event.severity,
                self.config.min_severity
            );
            return (PolicyOutcome::NoAction, None);
        }

        let (template, provenance, justification) = match self.raised_tier(event, inference) {
            Some((tier, reason)) => {
                let (template, note) = self.tier_default(tier);
                (template, Provenance::PolicyDefault, format!("{}; {}", reason, note))
            }
            None => self.base_choice(event, matches),
        };

        let (decision, substitution) = if self.is_allowed(&template.action) {
            (template.decide_for(event, provenance, justification), None)
        } else {
            let escalation = &self.config.escalation_action;
            tracing::warn!(
                "Action '{}' is not allow-listed, escalating with '{}'",
                template.action,
                escalation.action
            );
            let justification = format!(
                "{}; '{}' is not allow-listed, replaced by '{}'",
                justification, template.action, escalation.action
            );
            (
                escalation.decide_for(event, Provenance::PolicyDefault, justification),
                Some(Substitution {
                    rejected: template.action.clone(),
                    replacement: escalation.action.clone(),
                }),
            )
        };

        (PolicyOutcome::Action(decision), substitution)
    }

    fn base_choice<'a>(
        &'a self,
        event: &Event,
        matches: &'a [ScoredReference],
    ) -> (&'a ActionTemplate, Provenance, String) {
        let best = matches.iter().max_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.document.id.cmp(&a.document.id))
        });

        if let Some(best) = best {
            if best.score > self.config.acceptance_threshold {
                if let Some(template) = &best.document.recommended_action {
                    return (
                        template,
                        Provenance::Model,
                        format!(
                            "matched {} (score {:.3}) recommending {}",
                            best.document.id, best.score, template
                        ),
                    );
                }
            }
        }

        let reason = match best {
            None => "no reference procedures".to_string(),
            Some(best) if best.score > self.config.acceptance_threshold => {
                format!("{} has no recommended action", best.document.id)
            }
            Some(best) => format!(
                "best match {} (score {:.3}) below acceptance threshold {}",
                best.document.id, best.score, self.config.acceptance_threshold
            ),
        };
        let (template, note) = self.tier_default(event.severity);
        (template, Provenance::PolicyDefault, format!("{}; {}", reason, note))
    }

    fn tier_default(&self, tier: Severity) -> (&ActionTemplate, String) {
        match self.config.tier_defaults.get(tier) {
            Some(template) => (template, format!("{} tier default", tier)),
            None => (
                &self.config.escalation_action,
                format!("no {} tier default, escalating", tier),
            ),
        }
    }

    fn raised_tier(&self, event: &Event, inference: Option<&InferenceOutput>) -> Option<(Severity, String)> {
        let output = inference?;
        self.config
            .inference_triggers
            .iter()
            .filter_map(|trigger| trigger.fires(output).map(|value| (trigger, value)))
            .filter(|(trigger, _)| trigger.raise_to > event.severity)
            .max_by_key(|(trigger, _)| trigger.raise_to)
            .map(|(trigger, value)| {
                (
                    trigger.raise_to,
                    format!(
                        "{} = {} crossed trigger, tier raised {} → {}",
                        trigger.output, value, event.severity, trigger.raise_to
                    ),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ReferenceDocument;
    use crate::inference::DerivedValue;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn reference(id: &str, score: f32, action: Option<&str>) -> ScoredReference {
        ScoredReference {
            document: Arc::new(ReferenceDocument {
                id: id.to_string(),
                title: None,
                content: id.to_string(),
                embedding: vec![1.0],
                recommended_action: action.map(|a| a.parse().unwrap()),
                metadata: BTreeMap::new(),
            }),
            score,
        }
    }

    fn output(name: &str, value: f64, flagged: bool) -> InferenceOutput {
        InferenceOutput {
            model_id: "m".to_string(),
            values: vec![DerivedValue {
                name: name.to_string(),
                value,
                raw: value,
                clamped: false,
                flagged,
                range: None,
            }],
        }
    }

    fn policy() -> DecisionPolicy {
        DecisionPolicy::new(PolicyConfig::default()).unwrap()
    }

    fn error_event() -> Event {
        Event::new("LiquidHandler-01", Severity::Error, "Aspiration timeout").with_raw_code("ERR_VAC_04")
    }

    #[test]
    fn test_below_min_severity() {
        let event = Event::new("lh", Severity::Warn, "Tip low");
        let outcome = policy().decide(&event, &[reference("SOP-1", 0.99, Some("RETRY"))], None);
        assert_eq!(outcome, PolicyOutcome::NoAction);
    }

    #[test]
    fn test_accepted_match_uses_template() {
        let outcome = policy().decide(
            &error_event(),
            &[reference("SOP-104", 0.91, Some("RETRY(speed=0.5)"))],
            None,
        );
        let decision = outcome.into_decision().unwrap();
        assert_eq!(decision.action, "RETRY");
        assert_eq!(decision.parameters.get("speed"), Some(&ParamValue::Float(0.5)));
        assert_eq!(decision.provenance, Provenance::Model);
        assert!(decision.justification.contains("SOP-104"));
    }

    #[test]
    fn test_same_inputs_same_decision() {
        let policy = policy();
        let event = error_event();
        let matches = [reference("SOP-104", 0.91, Some("RETRY(speed=0.5)"))];

        let first = policy.decide(&event, &matches, None);
        let second = policy.decide(&event, &matches, None);
        assert_eq!(first, second);

        let trigger = output("titer", 0.1, false);
        assert_eq!(
            policy.decide(&event, &[], Some(&trigger)),
            policy.decide(&event, &[], Some(&trigger))
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        let outcome = policy().decide(
            &error_event(),
            &[reference("SOP-104", DEFAULT_ACCEPTANCE_THRESHOLD, Some("RETRY"))],
            None,
        );
        let decision = outcome.into_decision().unwrap();
        assert_eq!(decision.action, "PAUSE");
        assert_eq!(decision.provenance, Provenance::PolicyDefault);
    }

    #[test]
    fn test_no_matches_uses_tier_default() {
        let decision = policy().decide(&error_event(), &[], None).into_decision().unwrap();
        assert_eq!(decision.action, "PAUSE");
        assert_eq!(decision.provenance, Provenance::PolicyDefault);
    }

    #[test]
    fn test_match_without_template_uses_tier_default() {
        let decision = policy()
            .decide(&error_event(), &[reference("SOP-7", 0.95, None)], None)
            .into_decision()
            .unwrap();
        assert_eq!(decision.action, "PAUSE");
        assert!(decision.justification.contains("no recommended action"));
    }

    #[test]
    fn test_best_match_wins_regardless_of_order() {
        let decision = policy()
            .decide(
                &error_event(),
                &[
                    reference("SOP-2", 0.6, Some("PAUSE")),
                    reference("SOP-1", 0.9, Some("RETRY")),
                ],
                None,
            )
            .into_decision()
            .unwrap();
        assert_eq!(decision.action, "RETRY");
    }

    #[test]
    fn test_missing_tier_default_escalates() {
        let mut config = PolicyConfig::default();
        config.tier_defaults = TierDefaults::default();
        let policy = DecisionPolicy::new(config).unwrap();

        let decision = policy.decide(&error_event(), &[], None).into_decision().unwrap();
        assert_eq!(decision.action, "NOTIFY");
        assert_eq!(decision.provenance, Provenance::PolicyDefault);
    }

    #[test]
    fn test_disallowed_action_replaced() {
        let (outcome, substitution) = policy().decide_traced(
            &error_event(),
            &[reference("SOP-9", 0.99, Some("SELF_DESTRUCT"))],
            None,
        );
        let decision = outcome.into_decision().unwrap();
        assert_eq!(decision.action, "NOTIFY");
        assert_eq!(decision.provenance, Provenance::PolicyDefault);
        assert_eq!(substitution.unwrap().rejected, "SELF_DESTRUCT");
    }

    #[test]
    fn test_trigger_raises_tier() {
        let config = PolicyConfig::default().with_trigger(InferenceTrigger {
            output: "titer_g_l".to_string(),
            above: None,
            below: Some(1.0),
            raise_to: Severity::Critical,
        });
        let policy = DecisionPolicy::new(config).unwrap();

        let decision = policy
            .decide(
                &error_event(),
                &[reference("SOP-104", 0.9, Some("RETRY"))],
                Some(&output("titer_g_l", 0.4, false)),
            )
            .into_decision()
            .unwrap();
        assert_eq!(decision.action, "ABORT");
        assert!(decision.justification.contains("titer_g_l"));
    }

    #[test]
    fn test_trigger_never_lowers_tier() {
        let config = PolicyConfig::default().with_trigger(InferenceTrigger {
            output: "titer_g_l".to_string(),
            above: Some(5.0),
            below: None,
            raise_to: Severity::Warn,
        });
        let policy = DecisionPolicy::new(config).unwrap();

        let event = Event::new("lh", Severity::Critical, "Door open");
        let decision = policy
            .decide(&event, &[], Some(&output("titer_g_l", 9.0, false)))
            .into_decision()
            .unwrap();
        assert_eq!(decision.action, "ABORT");
    }

    #[test]
    fn test_flagged_output_never_triggers() {
        let config = PolicyConfig::default().with_trigger(InferenceTrigger {
            output: "titer_g_l".to_string(),
            above: Some(5.0),
            below: None,
            raise_to: Severity::Critical,
        });
        let policy = DecisionPolicy::new(config).unwrap();

        let decision = policy
            .decide(&error_event(), &[], Some(&output("titer_g_l", 9.0, true)))
            .into_decision()
            .unwrap();
        assert_eq!(decision.action, "PAUSE");
    }

    #[test]
    fn test_validate_rejects_unlisted_defaults() {
        let config = PolicyConfig::default().with_escalation_action(ActionTemplate::new("PAGE"));
        assert!(matches!(
            DecisionPolicy::new(config),
            Err(SignalError::InvalidConfig(_))
        ));

        let config =
            PolicyConfig::default().with_tier_default(Severity::Error, ActionTemplate::new("REBOOT"));
        assert!(config.validate().is_err());

        assert!(PolicyConfig::default()
            .with_allowed_actions(Vec::<String>::new())
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        assert!(PolicyConfig::default()
            .with_acceptance_threshold(1.5)
            .validate()
            .is_err());
        assert!(PolicyConfig::default()
            .with_acceptance_threshold(f32::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_tier_defaults_from_toml() {
        let config: PolicyConfig = toml::from_str(
            r#"
allowed_actions = ["RETRY", "PAUSE", "NOTIFY"]
min_severity = "WARNING"
escalation_action = "NOTIFY"

[tier_defaults]
warn = "NOTIFY(channel=ops)"
error = "PAUSE"
"#,
        )
        .unwrap();

        assert_eq!(config.min_severity, Severity::Warn);
        assert_eq!(config.tier_defaults.get(Severity::Error), Some(&ActionTemplate::new("PAUSE")));
        assert!(config.tier_defaults.get(Severity::Critical).is_none());
        assert!(config.validate().is_ok());
    }

    fn arb_severity() -> impl Strategy<Value = Severity> {
        prop::sample::select(Severity::ALL.to_vec())
    }

    fn arb_action() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop::sample::select(vec![
            "RETRY".to_string(),
            "PAUSE".to_string(),
            "REBOOT".to_string(),
            "SELF_DESTRUCT".to_string(),
            "IGNORE".to_string(),
        ]))
    }

    proptest! {
        #[test]
        fn prop_below_min_is_no_action(
            score in -1.0f32..=1.0,
            action in arb_action(),
            min in arb_severity(),
            severity in arb_severity(),
            value in -100.0f64..100.0,
        ) {
            prop_assume!(severity < min);
            let config = PolicyConfig::default()
                .with_min_severity(min)
                .with_trigger(InferenceTrigger {
                    output: "y".to_string(),
                    above: Some(0.0),
                    below: None,
                    raise_to: Severity::Critical,
                });
            let policy = DecisionPolicy::new(config).unwrap();
            let event = Event::new("src", severity, "anything");
            let matches = vec![reference("SOP", score, action.as_deref())];

            let outcome = policy.decide(&event, &matches, Some(&output("y", value, false)));
            prop_assert_eq!(outcome, PolicyOutcome::NoAction);
        }

        #[test]
        fn prop_decisions_are_allow_listed(
            scores in prop::collection::vec(-1.0f32..=1.0, 0..4),
            actions in prop::collection::vec(arb_action(), 4),
            severity in arb_severity(),
            value in prop::option::of(-100.0f64..100.0),
            flagged in any::<bool>(),
        ) {
            let config = PolicyConfig::default()
                .with_min_severity(Severity::Info)
                .with_trigger(InferenceTrigger {
                    output: "y".to_string(),
                    above: Some(10.0),
                    below: Some(-10.0),
                    raise_to: Severity::Critical,
                });
            let policy = DecisionPolicy::new(config.clone()).unwrap();
            let event = Event::new("src", severity, "anything");
            let matches: Vec<ScoredReference> = scores
                .iter()
                .zip(actions.iter())
                .enumerate()
                .map(|(i, (score, action))| reference(&format!("SOP-{}", i), *score, action.as_deref()))
                .collect();
            let inference = value.map(|v| output("y", v, flagged));

            let outcome = policy.decide(&event, &matches, inference.as_ref());
            let decision = outcome.into_decision();
            prop_assert!(decision.is_some());
            if let Some(decision) = decision {
                prop_assert!(config.is_allowed(&decision.action));
            }
        }
    }
}

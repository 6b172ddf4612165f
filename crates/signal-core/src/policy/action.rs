//! Action templates and decisions
//!
//! An `ActionTemplate` is what a procedure or the configuration *recommends*
//! (`RETRY(speed=0.5)`); an `ActionDecision` is what the loop actually chose for
//! one event, with provenance and justification attached.

use crate::types::{Event, EventId, SourceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A single action parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer parameter
    Integer(i64),
    /// Floating point parameter
    Float(f64),
    /// Free text parameter
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Text(_) => None,
        }
    }

    fn parse_literal(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            return ParamValue::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return ParamValue::Float(f);
            }
        }
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
            .unwrap_or(raw);
        ParamValue::Text(unquoted.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Ordered parameter mapping
pub type Parameters = BTreeMap<String, ParamValue>;

/// A recommended action: name plus parameters.
///
/// Accepts either the compact form `"RETRY(speed=0.5)"` or the full
/// `{ "action": "RETRY", "parameters": { "speed": 0.5 } }` form when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateRepr")]
pub struct ActionTemplate {
    /// Action name, matched against the allow-list
    pub action: String,

    /// Action parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: Parameters,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateRepr {
    Compact(String),
    Full {
        action: String,
        #[serde(default)]
        parameters: Parameters,
    },
}

impl TryFrom<TemplateRepr> for ActionTemplate {
    type Error = String;

    fn try_from(repr: TemplateRepr) -> Result<Self, Self::Error> {
        match repr {
            TemplateRepr::Compact(s) => s.parse(),
            TemplateRepr::Full { action, parameters } => {
                validate_action_name(&action)?;
                Ok(Self { action, parameters })
            }
        }
    }
}

fn validate_action_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("action name is empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("invalid action name '{}'", name));
    }
    Ok(())
}

impl ActionTemplate {
    /// Create a template without parameters
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Parameters::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Instantiate this template as a decision for `event`.
    ///
    /// The result depends only on the arguments: the id is derived from the
    /// event and the chosen action, and `decided_at` is the event's timestamp.
    pub fn decide_for(
        &self,
        event: &Event,
        provenance: Provenance,
        justification: impl Into<String>,
    ) -> ActionDecision {
        ActionDecision {
            id: decision_id(&event.id, self, provenance),
            event_id: Some(event.id.clone()),
            source: event.source.clone(),
            action: self.action.clone(),
            parameters: self.parameters.clone(),
            justification: justification.into(),
            provenance,
            decided_at: event.timestamp,
        }
    }
}

fn decision_id(event_id: &EventId, template: &ActionTemplate, provenance: Provenance) -> Uuid {
    let mut hasher = blake3::Hasher::new();
    hasher.update(event_id.0.as_bytes());
    hasher.update(&[0]);
    hasher.update(template.to_string().as_bytes());
    hasher.update(&[0]);
    hasher.update(format!("{:?}", provenance).as_bytes());

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    Uuid::from_bytes(bytes)
}

impl FromStr for ActionTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, args) = match s.find('(') {
            Some(open) => {
                let body = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| format!("unbalanced parentheses in '{}'", s))?;
                (s[..open].trim(), Some(body))
            }
            None => (s, None),
        };
        validate_action_name(name)?;

        let mut parameters = Parameters::new();
        if let Some(body) = args {
            for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("parameter '{}' is not key=value", pair))?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("empty parameter name in '{}'", s));
                }
                parameters.insert(key.to_string(), ParamValue::parse_literal(value));
            }
        }

        Ok(Self {
            action: name.to_string(),
            parameters,
        })
    }
}

impl fmt::Display for ActionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action)?;
        if !self.parameters.is_empty() {
            let args: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "({})", args.join(", "))?;
        }
        Ok(())
    }
}

/// Where a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    /// Retrieved procedure or model-derived trigger
    Model,
    /// Configured default for a severity tier
    PolicyDefault,
    /// Fail-safe substituted by the deadline supervisor
    DeadlineFallback,
    /// Operator-supplied action
    ManualOverride,
}

/// The action chosen for one event. Immutable; emitted once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    /// Decision identifier
    pub id: Uuid,

    /// Triggering event (absent for manual overrides)
    pub event_id: Option<EventId>,

    /// Instrument the action targets
    pub source: SourceId,

    /// Action name, always a member of the allow-list
    pub action: String,

    /// Action parameters
    pub parameters: Parameters,

    /// Human-readable justification
    pub justification: String,

    /// Provenance tag
    pub provenance: Provenance,

    /// Timestamp of the triggering event, or issue time for manual overrides
    pub decided_at: Timestamp,
}

impl ActionDecision {
    /// Whether this decision carries exactly the given action and parameters
    pub fn matches_template(&self, template: &ActionTemplate) -> bool {
        self.action == template.action && self.parameters == template.parameters
    }

    /// The decision's action as a template
    pub fn template(&self) -> ActionTemplate {
        ActionTemplate {
            action: self.action.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

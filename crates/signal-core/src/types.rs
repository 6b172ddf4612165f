//! Core types for Signal
//!
//! This module defines the fundamental types shared by every stage of the loop:
//! - Timestamps
//! - Severity levels
//! - Event and source identifiers
//! - The immutable instrument `Event`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// Event severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[serde(alias = "WARNING")]
    Warn,
    /// Error
    Error,
    /// Critical
    Critical,
}

impl Severity {
    /// All severities, ascending
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Critical,
    ];

    /// Upper-case wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Unique event identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(format!("evt:{}", Uuid::new_v4()))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the instrument (or adapter) producing events
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A fault or log event delivered by an instrument adapter.
///
/// Immutable once built; the loop consumes each event exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    #[serde(default)]
    pub id: EventId,

    /// When the instrument raised the event
    #[serde(default = "now")]
    pub timestamp: Timestamp,

    /// Severity level
    pub severity: Severity,

    /// Emitting instrument
    pub source: SourceId,

    /// Human-readable message
    pub message: String,

    /// Vendor-specific error code, e.g. `ERR_VAC_04`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_code: Option<String>,

    /// Adapter-supplied context, e.g. `{"tip_pos": "A1"}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl Event {
    /// Create a new event stamped now
    pub fn new(
        source: impl Into<SourceId>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp: now(),
            severity,
            source: source.into(),
            message: message.into(),
            raw_code: None,
            context: BTreeMap::new(),
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = EventId(id.into());
        self
    }

    /// Set the raw instrument code
    pub fn with_raw_code(mut self, code: impl Into<String>) -> Self {
        self.raw_code = Some(code.into());
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Text used to query the similarity index: raw code, message, then context
    pub fn retrieval_text(&self) -> String {
        let mut text = String::new();
        if let Some(code) = &self.raw_code {
            text.push_str(code);
            text.push(' ');
        }
        text.push_str(&self.message);
        for (key, value) in &self.context {
            text.push(' ');
            text.push_str(key);
            text.push('=');
            text.push_str(value);
        }
        text
    }
}

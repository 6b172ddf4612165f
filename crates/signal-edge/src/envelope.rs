//! Wire envelopes - one JSON object per line in each direction

use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use signal_core::policy::ActionTemplate;
use signal_core::{Disposition, Event, OpsRecord, SourceId, SyncRecord, Timestamp};
use std::path::PathBuf;

/// A single telemetry reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Instrument the reading comes from
    pub source: SourceId,
    /// Channel name, e.g. `ph`
    pub channel: String,
    /// Measured value
    pub value: f64,
    /// Measurement time; arrival time when omitted
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Operator request to issue an action directly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    /// Target instrument
    pub source: SourceId,
    /// Action, compact (`PAUSE`) or full form
    pub action: ActionTemplate,
    /// Operator's reason
    #[serde(default)]
    pub justification: String,
}

/// Inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// An instrument event to decide on
    Event(Event),
    /// A telemetry reading
    Telemetry(TelemetryReading),
    /// A manual override
    Override(OverrideRequest),
    /// Swap in the corpus at `path`
    ReloadCorpus { path: PathBuf },
    /// Swap in the model described by `spec_path` and `artifact_path`
    ReloadModel {
        spec_path: PathBuf,
        artifact_path: PathBuf,
    },
}

impl Inbound {
    /// Parse one input line
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| EdgeError::Envelope(e.to_string()))
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Event(_) => "event",
            Inbound::Telemetry(_) => "telemetry",
            Inbound::Override(_) => "override",
            Inbound::ReloadCorpus { .. } => "reload_corpus",
            Inbound::ReloadModel { .. } => "reload_model",
        }
    }
}

/// Outbound message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stream", content = "record", rename_all = "snake_case")]
pub enum Outbound {
    /// An issued or notify-only action
    Action(Disposition),
    /// A material state change
    Sync(SyncRecord),
    /// An operational event
    Ops(OpsRecord),
    /// An input line that could not be handled
    Rejected { line: u64, reason: String },
}

impl Outbound {
    /// Render as a single JSON line (without the trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

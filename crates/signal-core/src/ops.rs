//! Operational events - what the loop did when it could not do the normal thing
//!
//! Every fallback, drop, substitution and reload is published here and logged.
//! Publishing never blocks: with no subscribers the record is only logged, and
//! slow subscribers lag rather than stall the loop.

use crate::types::{now, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default capacity of the operational event bus
pub const DEFAULT_OPS_CAPACITY: usize = 256;

/// A published operational event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsRecord {
    /// Record identifier
    pub id: Uuid,
    /// When it was published
    pub timestamp: Timestamp,
    /// What happened
    pub event: OperationalEvent,
}

/// Operational event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationalEvent {
    /// A decision attempt overran its budget; the fail-safe was issued
    DeadlineExceeded {
        source: String,
        event_id: String,
        budget_ms: u64,
        elapsed_ms: u64,
        failsafe_action: String,
    },

    /// A decision attempt failed or panicked; the fail-safe was issued
    CycleFaulted {
        source: String,
        event_id: String,
        cause: String,
        failsafe_action: String,
    },

    /// The policy replaced a non-allow-listed action
    DisallowedActionReplaced {
        source: String,
        event_id: String,
        rejected: String,
        replacement: String,
    },

    /// A queued or incoming event was dropped because the source lane was full
    QueueOverflow {
        source: String,
        dropped_event_id: String,
        dropped_severity: String,
        capacity: usize,
    },

    /// Inference was skipped for a cycle
    InferenceSkipped {
        source: String,
        event_id: String,
        reason: String,
    },

    /// A sync record could not be delivered; it will be retried
    SyncDeferred {
        entity: String,
        field: String,
        reason: String,
    },

    /// A decision could not be handed to the action sink
    ActionDispatchFailed {
        source: String,
        action: String,
        reason: String,
    },

    /// A new corpus generation is active
    IndexReloaded {
        generation: u64,
        documents: usize,
        dimension: usize,
        fingerprint: String,
    },

    /// A corpus reload was rejected; the previous corpus stays active
    IndexReloadFailed { reason: String },

    /// A new model is active
    ModelReloaded {
        model_id: String,
        previous: Option<String>,
    },

    /// A model load was rejected; the previous model stays active
    ModelReloadFailed { reason: String },
}

impl OperationalEvent {
    /// Short, stable name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            OperationalEvent::DeadlineExceeded { .. } => "DeadlineExceeded",
            OperationalEvent::CycleFaulted { .. } => "CycleFaulted",
            OperationalEvent::DisallowedActionReplaced { .. } => "DisallowedActionReplaced",
            OperationalEvent::QueueOverflow { .. } => "QueueOverflow",
            OperationalEvent::InferenceSkipped { .. } => "InferenceSkipped",
            OperationalEvent::SyncDeferred { .. } => "SyncDeferred",
            OperationalEvent::ActionDispatchFailed { .. } => "ActionDispatchFailed",
            OperationalEvent::IndexReloaded { .. } => "IndexReloaded",
            OperationalEvent::IndexReloadFailed { .. } => "IndexReloadFailed",
            OperationalEvent::ModelReloaded { .. } => "ModelReloaded",
            OperationalEvent::ModelReloadFailed { .. } => "ModelReloadFailed",
        }
    }

    fn log(&self) {
        match self {
            OperationalEvent::IndexReloaded { .. } | OperationalEvent::ModelReloaded { .. } => {
                tracing::info!("ops: {:?}", self)
            }
            OperationalEvent::CycleFaulted { .. }
            | OperationalEvent::IndexReloadFailed { .. }
            | OperationalEvent::ModelReloadFailed { .. } => tracing::error!("ops: {:?}", self),
            _ => tracing::warn!("ops: {:?}", self),
        }
    }
}

/// Broadcast bus for operational events
#[derive(Debug, Clone)]
pub struct OpsBus {
    tx: broadcast::Sender<OpsRecord>,
}

impl OpsBus {
    /// Create a bus retaining up to `capacity` unread records per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Log and broadcast `event`
    pub fn publish(&self, event: OperationalEvent) -> OpsRecord {
        event.log();
        let record = OpsRecord {
            id: Uuid::new_v4(),
            timestamp: now(),
            event,
        };
        // No subscribers is fine; the record has been logged
        let _ = self.tx.send(record.clone());
        record
    }

    /// Subscribe to records published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OpsRecord> {
        self.tx.subscribe()
    }
}

impl Default for OpsBus {
    fn default() -> Self {
        Self::new(DEFAULT_OPS_CAPACITY)
    }
}

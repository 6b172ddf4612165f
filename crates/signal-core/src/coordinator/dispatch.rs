//! Dispositions and the action sink seam

use crate::config::Autonomy;
use crate::error::{Result, SignalError};
use crate::policy::ActionDecision;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// What the loop does with a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", content = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Carry the action out
    Issue(ActionDecision),
    /// Report the action without carrying it out
    Notify(ActionDecision),
}

impl Disposition {
    /// Resolve a decision under `autonomy`
    pub fn resolve(decision: ActionDecision, autonomy: Autonomy) -> Self {
        match autonomy {
            Autonomy::Autonomous => Disposition::Issue(decision),
            Autonomy::NotifyOnly => Disposition::Notify(decision),
        }
    }

    /// The underlying decision
    pub fn decision(&self) -> &ActionDecision {
        match self {
            Disposition::Issue(decision) | Disposition::Notify(decision) => decision,
        }
    }

    /// Whether the action is to be carried out
    pub fn is_issued(&self) -> bool {
        matches!(self, Disposition::Issue(_))
    }
}

/// Receives dispositions from the loop
#[async_trait]
pub trait ActionSink: Send + Sync + std::fmt::Debug {
    /// Hand one disposition downstream
    async fn dispatch(&self, disposition: Disposition) -> Result<()>;
}

/// Sink backed by a bounded channel; waits at most `timeout` for room
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Disposition>,
    timeout: Duration,
}

impl ChannelSink {
    /// Create a sink and the receiving half of its channel
    pub fn new(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<Disposition>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }
}

#[async_trait]
impl ActionSink for ChannelSink {
    async fn dispatch(&self, disposition: Disposition) -> Result<()> {
        self.tx
            .send_timeout(disposition, self.timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SignalError::ChannelClosed(format!(
                    "action stream full for {}ms",
                    self.timeout.as_millis()
                )),
                mpsc::error::SendTimeoutError::Closed(_) => {
                    SignalError::ChannelClosed("action stream receiver dropped".to_string())
                }
            })
    }
}

//! Signal Core - Bounded-time Sense-Infer-Act-Sync loop for edge instruments
//!
//! Signal Core turns instrument events and telemetry into allow-listed
//! actions within a fixed time budget, and forwards only material state
//! changes upstream.
//!
//! # Architecture
//!
//! One cycle per event, built from six parts:
//!
//! 1. **Similarity Index** (`index`): Nearest-neighbour lookup over procedure documents
//! 2. **Inference Runner** (`inference`): Soft-sensor models with physical range checks
//! 3. **Decision Policy** (`policy`): Event + matches + derived values to at most one action
//! 4. **Deadline Supervisor** (`supervisor`): Hard budget on every decision attempt
//! 5. **Delta Gate** (`delta`): Suppresses non-material changes before sync
//! 6. **Loop Coordinator** (`coordinator`): Per-source ordering, fallbacks, output streams
//!
//! # Quick Start
//!
//! ```
//! use signal_core::{Event, LoopConfig, LoopCoordinator, Severity};
//!
//! # async fn demo() -> signal_core::Result<()> {
//! let (coordinator, mut streams) = LoopCoordinator::new(LoopConfig::default())?;
//!
//! let event = Event::new("LiquidHandler-01", Severity::Error, "Aspiration timeout")
//!     .with_raw_code("ERR_VAC_04");
//! let report = coordinator.submit(event)?.report().await?;
//!
//! if let Some(decision) = report.decision() {
//!     println!("{} ({:?})", decision.action, decision.provenance);
//! }
//! if let Some(actions) = streams.actions.as_mut() {
//!     let _issued = actions.recv().await;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees
//!
//! - Every event at or above the minimum severity gets exactly one decision
//! - Every decision names an allow-listed action
//! - A decision attempt never outlives its budget; overruns resolve to the fail-safe
//! - Events from one source are decided in arrival order
//! - Sync records are emitted only for material changes

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod coordinator;
pub mod delta;
pub mod error;
pub mod index;
pub mod inference;
pub mod ops;
pub mod policy;
pub mod supervisor;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{Autonomy, LoopConfig};
pub use coordinator::{
    ActionSink, ChannelSink, CycleReport, CycleState, CycleTicket, Disposition, LoopBuilder,
    LoopCoordinator, LoopStats, LoopStreams,
};
pub use delta::{DeltaConfig, DeltaGate, Observation, SyncRecord, Threshold};
pub use error::{Result, SignalError};
pub use index::{Embedder, HashingEmbedder, Query, ReferenceDocument, ScoredReference, SimilarityIndex};
pub use inference::{InferenceInput, InferenceOutput, InferenceRunner, LoadedModel, ModelSpec};
pub use ops::{OperationalEvent, OpsBus, OpsRecord};
pub use policy::{ActionDecision, ActionTemplate, DecisionPolicy, PolicyConfig, PolicyOutcome, Provenance};
pub use supervisor::{DeadlineSupervisor, Supervised};
pub use types::{Event, EventId, Severity, SourceId, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

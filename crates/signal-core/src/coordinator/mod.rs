//! # Loop Coordinator
//!
//! Drives the Sense-Infer-Act-Sync cycle for every submitted event:
//!
//! ```text
//! IDLE → RETRIEVING ┐
//!        INFERRING  ┴→ DECIDING → DEADLINE CHECK → ACTING ┐
//!                                                 SYNCING ┴→ IDLE
//! ```
//!
//! Retrieval and inference run concurrently; everything from RETRIEVING to
//! DECIDING is one supervised attempt under the deadline budget. ACTING and
//! SYNCING run concurrently so a slow action consumer never holds back sync.
//!
//! At most one cycle is in flight per source. Later events from the same
//! source wait in a bounded lane and run in arrival order; different sources
//! proceed in parallel.

pub mod dispatch;
mod lanes;

pub use dispatch::{ActionSink, ChannelSink, Disposition};

use crate::config::LoopConfig;
use crate::delta::{DeltaGate, Observation, SyncRecord};
use crate::error::{Result, ResultExt, SignalError};
use crate::index::{Embedder, HashingEmbedder, Query, ReferenceDocument, ReloadSummary, SimilarityIndex};
use crate::inference::{InferenceInput, InferenceOutput, InferenceRunner, LoadedModel};
use crate::ops::{OperationalEvent, OpsBus, OpsRecord};
use crate::policy::{ActionDecision, ActionTemplate, DecisionPolicy, PolicyOutcome, Provenance, Substitution};
use crate::supervisor::{DeadlineSupervisor, Supervised};
use crate::types::{now, Event, EventId, SourceId, Timestamp};
use dashmap::DashMap;
use lanes::{Admission, Lanes, Next, Pending};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Phases of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    /// Waiting for an event
    Idle,
    /// Querying the similarity index
    Retrieving,
    /// Running the predictive model
    Inferring,
    /// Applying the decision policy
    Deciding,
    /// Checking the supervised attempt against its budget
    DeadlineCheck,
    /// Dispatching the disposition
    Acting,
    /// Offering derived values to the Delta Gate
    Syncing,
}

/// What happened during one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Triggering event
    pub event_id: EventId,
    /// Source of the event
    pub source: SourceId,
    /// Phases in the order they were entered
    pub phases: Vec<CycleState>,
    /// Disposition emitted, if the cycle produced a decision
    pub disposition: Option<Disposition>,
    /// The attempt overran its budget
    pub deadline_missed: bool,
    /// Why the attempt failed, if it did
    pub fault: Option<String>,
    /// Derived quantities from a completed attempt
    pub inference: Option<InferenceOutput>,
    /// Sync records emitted for derived quantities
    pub syncs: Vec<SyncRecord>,
    /// Wall-clock time of the whole cycle
    pub elapsed_ms: u64,
}

impl CycleReport {
    /// The decision, if any
    pub fn decision(&self) -> Option<&ActionDecision> {
        self.disposition.as_ref().map(Disposition::decision)
    }
}

/// Handle to a submitted event's cycle
#[derive(Debug)]
pub struct CycleTicket {
    queued_behind: usize,
    rx: oneshot::Receiver<Result<CycleReport>>,
}

impl CycleTicket {
    /// Events ahead of this one in its source lane when it was submitted
    pub fn queued_behind(&self) -> usize {
        self.queued_behind
    }

    /// Wait for the cycle to finish
    pub async fn report(self) -> Result<CycleReport> {
        self.rx
            .await
            .map_err(|_| SignalError::ChannelClosed("cycle ended without a report".to_string()))?
    }
}

/// Output streams of a running loop
#[derive(Debug)]
pub struct LoopStreams {
    /// Dispositions, when the built-in channel sink is in use
    pub actions: Option<mpsc::Receiver<Disposition>>,
    /// Material state changes
    pub sync: mpsc::Receiver<SyncRecord>,
    /// Operational events
    pub ops: broadcast::Receiver<OpsRecord>,
}

/// Counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    /// Cycles run
    pub cycles: u64,
    /// Attempts that overran their budget
    pub deadline_misses: u64,
    /// Attempts that failed or panicked
    pub faults: u64,
    /// Events dropped or refused by a full lane
    pub overflows: u64,
    /// Sync records deferred because the sync stream was unavailable
    pub deferred_syncs: u64,
    /// Dispositions the sink did not accept
    pub dispatch_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    deadline_misses: AtomicU64,
    faults: AtomicU64,
    overflows: AtomicU64,
    deferred_syncs: AtomicU64,
    dispatch_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoopStats {
        LoopStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            deferred_syncs: self.deferred_syncs.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}

/// Result of the supervised part of a cycle
#[derive(Debug)]
enum Attempt {
    Decided {
        outcome: PolicyOutcome,
        substitution: Option<Substitution>,
        inference: Option<InferenceOutput>,
    },
    Failed(String),
}

/// Builder for [`LoopCoordinator`]
#[derive(Debug)]
pub struct LoopBuilder {
    config: LoopConfig,
    embedder: Option<Arc<dyn Embedder>>,
    sink: Option<Arc<dyn ActionSink>>,
}

impl LoopBuilder {
    /// Use `embedder` for text queries instead of the hashing embedder
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Send dispositions to `sink` instead of the built-in channel
    pub fn action_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration, load any configured corpus and model, and
    /// assemble the loop
    pub fn build(self) -> Result<(LoopCoordinator, LoopStreams)> {
        let config = self.config;
        config.validate()?;

        let policy = Arc::new(DecisionPolicy::new(config.policy.clone())?);
        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashingEmbedder::new(config.index.embedding_dimension)));

        let index = Arc::new(SimilarityIndex::new(embedder));
        if let Some(path) = &config.index.corpus_path {
            index
                .reload_from_file(path)
                .with_context(|| format!("Failed to load corpus {}", path.display()))?;
        }

        let runner = Arc::new(InferenceRunner::new(config.max_execution()));
        if let (Some(spec), Some(artifact)) = (
            &config.inference.model_spec_path,
            &config.inference.model_artifact_path,
        ) {
            runner.load(LoadedModel::from_files(spec, artifact)?);
        }

        let (sink, actions) = match self.sink {
            Some(sink) => (sink, None),
            None => {
                let (sink, rx) =
                    ChannelSink::new(config.output.action_buffer, config.action_dispatch_timeout());
                (Arc::new(sink) as Arc<dyn ActionSink>, Some(rx))
            }
        };
        let (sync_tx, sync) = mpsc::channel(config.output.sync_buffer.max(1));
        let ops = OpsBus::new(config.output.ops_buffer);
        let ops_rx = ops.subscribe();

        tracing::info!(
            "Signal loop ready: deadline {}ms, autonomy {}, {} allowed actions, fail-safe {}",
            config.deadline_ms,
            config.autonomy,
            config.policy.allowed_actions.len(),
            config.failsafe_action
        );

        let inner = Inner {
            supervisor: DeadlineSupervisor::new(config.deadline()),
            gate: DeltaGate::new(config.delta.clone()),
            lanes: Lanes::new(config.queue.capacity_per_source),
            telemetry: DashMap::new(),
            counters: Counters::default(),
            config,
            policy,
            index,
            runner,
            sink,
            sync_tx,
            ops,
        };

        Ok((
            LoopCoordinator {
                inner: Arc::new(inner),
            },
            LoopStreams {
                actions,
                sync,
                ops: ops_rx,
            },
        ))
    }
}

/// The edge reflex loop. Cheap to clone; all clones drive the same loop.
#[derive(Debug, Clone)]
pub struct LoopCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: LoopConfig,
    policy: Arc<DecisionPolicy>,
    supervisor: DeadlineSupervisor,
    index: Arc<SimilarityIndex>,
    runner: Arc<InferenceRunner>,
    gate: DeltaGate,
    lanes: Lanes,
    telemetry: DashMap<(SourceId, String), f64>,
    sink: Arc<dyn ActionSink>,
    sync_tx: mpsc::Sender<SyncRecord>,
    ops: OpsBus,
    counters: Counters,
}

impl LoopCoordinator {
    /// Start building a loop from `config`
    pub fn builder(config: LoopConfig) -> LoopBuilder {
        LoopBuilder {
            config,
            embedder: None,
            sink: None,
        }
    }

    /// Build a loop with the hashing embedder and the built-in action channel
    pub fn new(config: LoopConfig) -> Result<(Self, LoopStreams)> {
        Self::builder(config).build()
    }

    /// Active configuration
    pub fn config(&self) -> &LoopConfig {
        &self.inner.config
    }

    /// The similarity index
    pub fn index(&self) -> &SimilarityIndex {
        &self.inner.index
    }

    /// The inference runner
    pub fn runner(&self) -> &InferenceRunner {
        &self.inner.runner
    }

    /// The Delta Gate
    pub fn gate(&self) -> &DeltaGate {
        &self.inner.gate
    }

    /// Subscribe to operational events
    pub fn subscribe_ops(&self) -> broadcast::Receiver<OpsRecord> {
        self.inner.ops.subscribe()
    }

    /// Counters since startup
    pub fn stats(&self) -> LoopStats {
        self.inner.counters.snapshot()
    }

    /// Events waiting behind the in-flight cycle for `source`
    pub fn queued(&self, source: &SourceId) -> usize {
        self.inner.lanes.queued(source)
    }

    /// Whether a cycle is in flight for `source`
    pub fn is_busy(&self, source: &SourceId) -> bool {
        self.inner.lanes.is_busy(source)
    }

    /// Submit an event. Must be called from within a Tokio runtime.
    ///
    /// Starts a cycle immediately if the source is idle, otherwise queues the
    /// event behind the in-flight cycle. Fails with `QueueOverflow` only when
    /// the lane is full of CRITICAL events.
    pub fn submit(&self, event: Event) -> Result<CycleTicket> {
        let (reply, rx) = oneshot::channel();
        tracing::debug!("Event {} from {} ({})", event.id, event.source, event.severity);

        match self.inner.lanes.admit(Pending { event, reply }) {
            Ok(Admission::Start(pending)) => {
                tokio::spawn(self.inner.clone().drain(pending));
                Ok(CycleTicket { queued_behind: 0, rx })
            }
            Ok(Admission::Queued { position, evicted }) => {
                if let Some(evicted) = evicted {
                    let err = self.inner.overflowed(&evicted.event);
                    let _ = evicted.reply.send(Err(err));
                }
                Ok(CycleTicket {
                    queued_behind: position.saturating_sub(1),
                    rx,
                })
            }
            Err((err, refused)) => {
                self.inner.overflowed(&refused.event);
                Err(err)
            }
        }
    }

    /// Record a telemetry reading and offer it to the Delta Gate.
    ///
    /// The latest reading per (source, channel) also feeds model inputs.
    pub fn observe_telemetry(
        &self,
        source: impl Into<SourceId>,
        channel: &str,
        value: f64,
        timestamp: Timestamp,
    ) -> Option<SyncRecord> {
        let source = source.into();
        self.inner
            .telemetry
            .insert((source.clone(), channel.to_string()), value);
        self.inner
            .offer(Observation::new(source.as_str(), channel, value, timestamp))
    }

    /// Issue an operator-supplied action for `source`
    pub async fn manual_override(
        &self,
        source: impl Into<SourceId>,
        template: ActionTemplate,
        justification: impl Into<String>,
    ) -> Result<Disposition> {
        if !self.inner.policy.is_allowed(&template.action) {
            return Err(SignalError::ActionNotAllowed(template.action));
        }

        let decision = ActionDecision {
            id: Uuid::new_v4(),
            event_id: None,
            source: source.into(),
            action: template.action,
            parameters: template.parameters,
            justification: justification.into(),
            provenance: Provenance::ManualOverride,
            decided_at: now(),
        };
        tracing::info!("Manual override for {}: {}", decision.source, decision.action);

        let disposition = Disposition::Issue(decision);
        self.inner.sink.dispatch(disposition.clone()).await?;
        Ok(disposition)
    }

    /// Swap in a new corpus; on failure the previous corpus stays active
    pub fn reload_corpus(&self, documents: Vec<ReferenceDocument>) -> Result<ReloadSummary> {
        let result = self.inner.index.reload(documents);
        self.inner.reloaded(result)
    }

    /// Load a corpus file and swap it in
    pub fn reload_corpus_from_file(&self, path: impl AsRef<Path>) -> Result<ReloadSummary> {
        let result = self.inner.index.reload_from_file(path);
        self.inner.reloaded(result)
    }

    /// Swap in a new model
    pub fn load_model(&self, model: LoadedModel) {
        let model_id = model.id().to_string();
        let previous = self.inner.runner.load(model);
        self.inner.ops.publish(OperationalEvent::ModelReloaded {
            model_id,
            previous: previous.map(|m| m.id().to_string()),
        });
    }

    /// Load a model spec and linear artifact from disk and swap it in; on
    /// failure the previous model stays active
    pub fn load_model_from_files(
        &self,
        spec_path: impl AsRef<Path>,
        artifact_path: impl AsRef<Path>,
    ) -> Result<()> {
        match LoadedModel::from_files(spec_path, artifact_path) {
            Ok(model) => {
                self.load_model(model);
                Ok(())
            }
            Err(e) => {
                self.inner.ops.publish(OperationalEvent::ModelReloadFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

/// Hands a lane on if its drain task unwinds mid-cycle
struct LaneRelease {
    inner: Arc<Inner>,
    source: SourceId,
    armed: bool,
}

impl Drop for LaneRelease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            Counters::bump(&self.inner.counters.faults);
            tracing::error!("Cycle for {} panicked; releasing its lane", self.source);
        }
        if let Next::Run(next) = self.inner.lanes.finish(&self.source) {
            // Without a runtime (shutdown) the queued events are simply dropped
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(self.inner.clone().drain(next));
            }
        }
    }
}

impl Inner {
    async fn drain(self: Arc<Self>, first: Pending) {
        let source = first.event.source.clone();
        let mut pending = first;
        loop {
            let Pending { event, reply } = pending;
            let mut release = LaneRelease {
                inner: self.clone(),
                source: source.clone(),
                armed: true,
            };
            let report = self.run_cycle(event).await;
            let _ = reply.send(Ok(report));
            release.armed = false;

            match self.lanes.finish(&source) {
                Next::Run(next) => pending = next,
                Next::Idle => break,
            }
        }
    }

    async fn run_cycle(&self, event: Event) -> CycleReport {
        let started = Instant::now();
        Counters::bump(&self.counters.cycles);

        let mut phases = vec![CycleState::Idle];
        let (phase_tx, mut phase_rx) = mpsc::unbounded_channel();

        let prepared = self.prepare_inference(&event);
        let snapshot = self.index.snapshot();
        let embedder = self.index.embedder().clone();
        let policy = self.policy.clone();
        let top_k = policy.config().top_k;
        let max_execution = self.runner.max_execution();
        let attempt_event = event.clone();

        let supervised = self
            .supervisor
            .supervise(move |_token| async move {
                let _ = phase_tx.send(CycleState::Retrieving);
                let text = attempt_event.retrieval_text();
                let retrieval = tokio::task::spawn_blocking(move || {
                    SimilarityIndex::query_snapshot(&snapshot, embedder.as_ref(), Query::Text(&text), top_k)
                });

                let _ = phase_tx.send(CycleState::Inferring);
                let inference = async move {
                    match prepared {
                        Some((model, input)) => {
                            Some(InferenceRunner::run(model, input, max_execution).await)
                        }
                        None => None,
                    }
                };

                let (retrieved, inferred) = tokio::join!(retrieval, inference);

                let matches = match retrieved {
                    Ok(Ok(matches)) => matches,
                    Ok(Err(SignalError::IndexEmpty)) => Vec::new(),
                    Ok(Err(e)) => return Attempt::Failed(format!("retrieval failed: {}", e)),
                    Err(e) => return Attempt::Failed(format!("retrieval task failed: {}", e)),
                };
                let inference = match inferred {
                    Some(Ok(output)) => Some(output),
                    Some(Err(e)) => return Attempt::Failed(format!("inference failed: {}", e)),
                    None => None,
                };

                let _ = phase_tx.send(CycleState::Deciding);
                let (outcome, substitution) =
                    policy.decide_traced(&attempt_event, &matches, inference.as_ref());
                Attempt::Decided {
                    outcome,
                    substitution,
                    inference,
                }
            })
            .await;

        // Whatever the abandoned attempt reports after this point is discarded
        while let Ok(phase) = phase_rx.try_recv() {
            phases.push(phase);
        }
        drop(phase_rx);
        phases.push(CycleState::DeadlineCheck);

        let mut deadline_missed = false;
        let mut fault = None;
        let mut inference = None;

        let decision = match supervised {
            Supervised::Completed {
                value:
                    Attempt::Decided {
                        outcome,
                        substitution,
                        inference: output,
                    },
                ..
            } => {
                if let Some(sub) = substitution {
                    self.ops.publish(OperationalEvent::DisallowedActionReplaced {
                        source: event.source.to_string(),
                        event_id: event.id.to_string(),
                        rejected: sub.rejected,
                        replacement: sub.replacement,
                    });
                }
                inference = output;
                outcome.into_decision()
            }
            Supervised::Completed {
                value: Attempt::Failed(cause),
                ..
            }
            | Supervised::Faulted { reason: cause, .. } => {
                Counters::bump(&self.counters.faults);
                self.ops.publish(OperationalEvent::CycleFaulted {
                    source: event.source.to_string(),
                    event_id: event.id.to_string(),
                    cause: cause.clone(),
                    failsafe_action: self.config.failsafe_action.action.clone(),
                });
                let decision = self.fail_safe(&event, format!("fail-safe after fault: {}", cause));
                fault = Some(cause);
                Some(decision)
            }
            Supervised::Expired { elapsed } => {
                Counters::bump(&self.counters.deadline_misses);
                deadline_missed = true;
                let miss = self.supervisor.miss(elapsed);
                self.ops.publish(OperationalEvent::DeadlineExceeded {
                    source: event.source.to_string(),
                    event_id: event.id.to_string(),
                    budget_ms: self.config.deadline_ms,
                    elapsed_ms: elapsed.as_millis() as u64,
                    failsafe_action: self.config.failsafe_action.action.clone(),
                });
                Some(self.fail_safe(&event, format!("fail-safe: {}", miss)))
            }
        };

        let disposition = decision.map(|d| Disposition::resolve(d, self.config.autonomy));

        phases.push(CycleState::Acting);
        phases.push(CycleState::Syncing);
        let acting = async {
            if let Some(disposition) = &disposition {
                self.dispatch(disposition.clone()).await;
            }
        };
        let syncing = async { self.sync_inferred(&event.source, inference.as_ref()) };
        let ((), syncs) = tokio::join!(acting, syncing);
        phases.push(CycleState::Idle);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &disposition {
            Some(d) => tracing::info!(
                "Cycle {} for {}: {} {} ({:?}) in {}ms",
                event.id,
                event.source,
                if d.is_issued() { "issued" } else { "notified" },
                d.decision().action,
                d.decision().provenance,
                elapsed_ms
            ),
            None => tracing::debug!("Cycle {} for {}: no action in {}ms", event.id, event.source, elapsed_ms),
        }

        CycleReport {
            event_id: event.id,
            source: event.source,
            phases,
            disposition,
            deadline_missed,
            fault,
            inference,
            syncs,
            elapsed_ms,
        }
    }

    fn fail_safe(&self, event: &Event, justification: String) -> ActionDecision {
        self.config
            .failsafe_action
            .decide_for(event, Provenance::DeadlineFallback, justification)
    }

    fn prepare_inference(&self, event: &Event) -> Option<(Arc<LoadedModel>, InferenceInput)> {
        let model = self.runner.current()?;

        let mut channels = Vec::with_capacity(model.spec().input_channels.len());
        let mut missing = Vec::new();
        for channel in &model.spec().input_channels {
            let reading = self
                .telemetry
                .get(&(event.source.clone(), channel.clone()))
                .map(|entry| *entry.value())
                .filter(|v| v.is_finite());
            match reading {
                Some(value) => channels.push((channel.clone(), value)),
                None => missing.push(channel.as_str()),
            }
        }

        if !missing.is_empty() {
            self.ops.publish(OperationalEvent::InferenceSkipped {
                source: event.source.to_string(),
                event_id: event.id.to_string(),
                reason: format!("no usable telemetry for {}", missing.join(", ")),
            });
            return None;
        }
        Some((model, InferenceInput::new(channels)))
    }

    async fn dispatch(&self, disposition: Disposition) {
        let source = disposition.decision().source.to_string();
        let action = disposition.decision().action.clone();
        if let Err(e) = self.sink.dispatch(disposition).await {
            Counters::bump(&self.counters.dispatch_failures);
            self.ops.publish(OperationalEvent::ActionDispatchFailed {
                source,
                action,
                reason: e.to_string(),
            });
        }
    }

    fn sync_inferred(&self, source: &SourceId, output: Option<&InferenceOutput>) -> Vec<SyncRecord> {
        let Some(output) = output else {
            return Vec::new();
        };
        let timestamp = now();
        output
            .values
            .iter()
            .filter(|v| !v.flagged)
            .filter_map(|v| self.offer(Observation::new(source.as_str(), v.name.as_str(), v.value, timestamp)))
            .collect()
    }

    fn offer(&self, observation: Observation) -> Option<SyncRecord> {
        let entity = observation.entity.clone();
        let field = observation.field.clone();

        let delivered = self.gate.observe_with(observation, |record| {
            self.sync_tx.try_send(record.clone()).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => "sync stream full",
                mpsc::error::TrySendError::Closed(_) => "sync stream closed",
            })
        });

        match delivered {
            Ok(record) => record,
            Err(reason) => {
                Counters::bump(&self.counters.deferred_syncs);
                self.ops.publish(OperationalEvent::SyncDeferred {
                    entity,
                    field,
                    reason: reason.to_string(),
                });
                None
            }
        }
    }

    fn overflowed(&self, dropped: &Event) -> SignalError {
        Counters::bump(&self.counters.overflows);
        self.ops.publish(OperationalEvent::QueueOverflow {
            source: dropped.source.to_string(),
            dropped_event_id: dropped.id.to_string(),
            dropped_severity: dropped.severity.to_string(),
            capacity: self.lanes.capacity(),
        });
        SignalError::QueueOverflow {
            source_id: dropped.source.to_string(),
            reason: format!("event {} dropped from a full lane", dropped.id),
        }
    }

    fn reloaded(&self, result: Result<ReloadSummary>) -> Result<ReloadSummary> {
        match result {
            Ok(summary) => {
                self.ops.publish(OperationalEvent::IndexReloaded {
                    generation: summary.generation,
                    documents: summary.documents,
                    dimension: summary.dimension,
                    fingerprint: summary.fingerprint.clone(),
                });
                Ok(summary)
            }
            Err(e) => {
                self.ops.publish(OperationalEvent::IndexReloadFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

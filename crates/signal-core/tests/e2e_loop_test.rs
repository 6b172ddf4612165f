//! E2E Test: Reflex Loop
//!
//! Drives full cycles through the coordinator: retrieval-backed decisions,
//! tier defaults, deadline fall-back, per-source ordering and lane overflow.

use futures::future::join_all;
use signal_core::index::{Embedder, HashingEmbedder, ReferenceDocument};
use signal_core::inference::{LinearModel, ModelKind, ModelSpec, PredictiveModel};
use signal_core::policy::{InferenceTrigger, ParamValue};
use signal_core::{
    ActionTemplate, Autonomy, CycleState, Event, LoadedModel, LoopConfig, LoopCoordinator, OpsRecord, PolicyConfig,
    Provenance, Severity, SignalError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

const DIM: usize = 64;

/// Hashing embedder that takes a fixed time per query
#[derive(Debug)]
struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(DIM),
            delay,
        })
    }
}

impl Embedder for SlowEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        std::thread::sleep(self.delay);
        self.inner.embed(text)
    }
}

fn sop(id: &str, content: &str, action: &str) -> ReferenceDocument {
    ReferenceDocument {
        id: id.to_string(),
        title: Some(format!("{} procedure", id)),
        content: content.to_string(),
        embedding: HashingEmbedder::new(DIM).embed(content),
        recommended_action: Some(action.parse().unwrap()),
        metadata: BTreeMap::new(),
    }
}

fn lab_corpus() -> Vec<ReferenceDocument> {
    vec![
        sop("SOP-104", "ERR_VAC_04 Aspiration timeout", "RETRY(speed=0.5)"),
        sop("SOP-220", "ERR_DOOR_01 Door open during run", "PAUSE"),
    ]
}

fn config() -> LoopConfig {
    LoopConfig::default().with_embedding_dimension(DIM)
}

fn aspiration_error(source: &str, id: &str) -> Event {
    Event::new(source, Severity::Error, "Aspiration timeout")
        .with_raw_code("ERR_VAC_04")
        .with_id(id)
}

fn drain_kinds(rx: &mut broadcast::Receiver<OpsRecord>) -> Vec<&'static str> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|r| r.event.kind())
        .collect()
}

/// E2E test: a strong procedure match yields its recommended action
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_matched_procedure_drives_action() {
    let (coordinator, mut streams) = LoopCoordinator::new(config()).unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    let report = coordinator
        .submit(aspiration_error("LiquidHandler-01", "evt-1"))
        .unwrap()
        .report()
        .await
        .unwrap();

    let decision = report.decision().expect("ERROR event must be decided");
    assert_eq!(decision.action, "RETRY");
    assert_eq!(decision.parameters.get("speed"), Some(&ParamValue::Float(0.5)));
    assert_eq!(decision.provenance, Provenance::Model);
    assert!(decision.justification.contains("SOP-104"));

    let issued = streams.actions.as_mut().unwrap().recv().await.unwrap();
    assert!(issued.is_issued());
    assert_eq!(issued.decision().event_id.as_ref().map(|id| id.0.as_str()), Some("evt-1"));
}

/// E2E test: an empty corpus falls back to the ERROR tier default
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_empty_corpus_uses_tier_default() {
    let (coordinator, _streams) = LoopCoordinator::new(config()).unwrap();

    let report = coordinator
        .submit(aspiration_error("LiquidHandler-01", "evt-1"))
        .unwrap()
        .report()
        .await
        .unwrap();

    let decision = report.decision().unwrap();
    assert_eq!(decision.action, "PAUSE");
    assert_eq!(decision.provenance, Provenance::PolicyDefault);
    assert!(!report.deadline_missed);
}

/// Regression model that takes a fixed time per prediction
#[derive(Debug)]
struct SlowTiterModel {
    delay: Duration,
}

impl PredictiveModel for SlowTiterModel {
    fn predict(&self, input: &[f64]) -> Result<Vec<f64>, String> {
        std::thread::sleep(self.delay);
        Ok(vec![input[0] * 0.5])
    }
}

fn slow_titer_model(delay: Duration) -> LoadedModel {
    let spec = ModelSpec {
        id: "titer_slow".to_string(),
        input_channels: vec!["ph".to_string()],
        targets: vec!["titer_g_l".to_string()],
        physics_constraints: BTreeMap::new(),
        kind: ModelKind::Regression,
    };
    LoadedModel::new(spec, Arc::new(SlowTiterModel { delay })).unwrap()
}

/// E2E test: an attempt that overruns the default budget resolves to the
/// configured fail-safe, and the abandoned attempt never reaches the twin
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_deadline_miss_issues_failsafe() {
    let failsafe = ActionTemplate::new("PAUSE").with_param("seconds", 30i64);
    let cfg = config()
        .with_failsafe(failsafe.clone())
        .with_max_execution_ms(2_000);
    assert_eq!(cfg.deadline_ms, 200);
    let budget = cfg.deadline();

    let (coordinator, mut streams) = LoopCoordinator::new(cfg).unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();
    coordinator.load_model(slow_titer_model(Duration::from_millis(500)));

    let source = "LiquidHandler-01";
    assert!(coordinator
        .observe_telemetry(source, "ph", 7.0, signal_core::types::now())
        .is_some());
    assert_eq!(streams.sync.recv().await.unwrap().field, "ph");

    let started = Instant::now();
    let report = coordinator
        .submit(aspiration_error(source, "evt-slow"))
        .unwrap()
        .report()
        .await
        .unwrap();
    let waited = started.elapsed();

    assert!(report.deadline_missed);
    assert!(
        waited < budget + Duration::from_millis(100),
        "control returned after {:?}",
        waited
    );

    // Exactly the configured fail-safe, parameters included
    let decision = report.decision().unwrap();
    assert_eq!(decision.template(), failsafe);
    assert_eq!(decision.parameters.get("seconds"), Some(&ParamValue::Integer(30)));
    assert_eq!(decision.provenance, Provenance::DeadlineFallback);
    let issued = streams.actions.as_mut().unwrap().recv().await.unwrap();
    assert!(issued.is_issued());
    assert_eq!(issued.decision().template(), failsafe);

    // The abandoned attempt never reached DECIDING
    assert!(!report.phases.contains(&CycleState::Deciding));
    assert!(report.phases.contains(&CycleState::DeadlineCheck));
    assert!(report.inference.is_none());

    // Let the orphaned prediction finish; nothing of it may be synced
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(streams.sync.try_recv().is_err());
    assert!(coordinator.gate().last_emitted(source, "titer_g_l").is_none());
    assert!(coordinator.gate().last_emitted(source, "ph").is_some());

    assert!(drain_kinds(&mut streams.ops).contains(&"DeadlineExceeded"));
    assert_eq!(coordinator.stats().deadline_misses, 1);
}

/// E2E test: slow retrieval is abandoned the same way as slow inference
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_slow_retrieval_misses_deadline() {
    let (coordinator, _streams) = LoopCoordinator::builder(config())
        .embedder(SlowEmbedder::new(Duration::from_millis(500)))
        .build()
        .unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    let report = coordinator
        .submit(aspiration_error("LiquidHandler-01", "evt-slow"))
        .unwrap()
        .report()
        .await
        .unwrap();

    assert!(report.deadline_missed);
    assert!(report.elapsed_ms < 300);
    let decision = report.decision().unwrap();
    assert!(decision.matches_template(&config().failsafe_action));
    assert_eq!(decision.provenance, Provenance::DeadlineFallback);
}

/// E2E test: NOTIFY_ONLY reports the same decision without issuing it
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_notify_only_autonomy() {
    let cfg = config().with_autonomy(Autonomy::NotifyOnly);
    let (coordinator, mut streams) = LoopCoordinator::new(cfg).unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    coordinator
        .submit(aspiration_error("LiquidHandler-01", "evt-1"))
        .unwrap()
        .report()
        .await
        .unwrap();

    let disposition = streams.actions.as_mut().unwrap().recv().await.unwrap();
    assert!(!disposition.is_issued());
    assert_eq!(disposition.decision().action, "RETRY");
}

/// E2E test: a non-allow-listed recommendation is escalated
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_disallowed_recommendation_escalates() {
    let (coordinator, mut streams) = LoopCoordinator::new(config()).unwrap();
    coordinator
        .reload_corpus(vec![sop("SOP-900", "ERR_VAC_04 Aspiration timeout", "REBOOT")])
        .unwrap();

    let report = coordinator
        .submit(aspiration_error("LiquidHandler-01", "evt-1"))
        .unwrap()
        .report()
        .await
        .unwrap();

    assert_eq!(report.decision().unwrap().action, "NOTIFY");
    assert!(drain_kinds(&mut streams.ops).contains(&"DisallowedActionReplaced"));
}

/// E2E test: events from one source are decided in arrival order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_per_source_arrival_order() {
    let (coordinator, mut streams) = LoopCoordinator::builder(config().with_queue_capacity(8))
        .embedder(SlowEmbedder::new(Duration::from_millis(25)))
        .build()
        .unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    let ids: Vec<String> = (0..5).map(|i| format!("evt-{}", i)).collect();
    let tickets: Vec<_> = ids
        .iter()
        .map(|id| coordinator.submit(aspiration_error("LiquidHandler-01", id)).unwrap())
        .collect();
    assert_eq!(tickets[4].queued_behind(), 3);

    let reports = join_all(tickets.into_iter().map(|t| t.report())).await;
    assert!(reports.iter().all(|r| r.is_ok()));

    let actions = streams.actions.as_mut().unwrap();
    for id in &ids {
        let disposition = actions.recv().await.unwrap();
        assert_eq!(disposition.decision().event_id.as_ref().unwrap().0, *id);
    }
}

/// E2E test: independent sources are decided concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_sources_run_in_parallel() {
    let (coordinator, _streams) = LoopCoordinator::builder(config())
        .embedder(SlowEmbedder::new(Duration::from_millis(60)))
        .build()
        .unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    let a = coordinator.submit(aspiration_error("LH-A", "a1")).unwrap();
    let b = coordinator.submit(aspiration_error("LH-B", "b1")).unwrap();
    assert_eq!(a.queued_behind(), 0);
    assert_eq!(b.queued_behind(), 0);

    let (a, b) = tokio::join!(a.report(), b.report());
    assert_eq!(assert_ok!(a).decision().unwrap().action, "RETRY");
    assert_eq!(assert_ok!(b).decision().unwrap().action, "RETRY");
}

/// E2E test: a full lane evicts the oldest non-CRITICAL event, then refuses
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn e2e_lane_overflow_protects_critical() {
    let (coordinator, mut streams) =
        LoopCoordinator::builder(config().with_queue_capacity(1).with_deadline_ms(1_000))
            .embedder(SlowEmbedder::new(Duration::from_millis(150)))
            .build()
            .unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    let source = "LiquidHandler-01";
    let running = coordinator.submit(aspiration_error(source, "running")).unwrap();
    let warn = coordinator
        .submit(Event::new(source, Severity::Warn, "Tip count low").with_id("warn"))
        .unwrap();
    let critical = coordinator
        .submit(Event::new(source, Severity::Critical, "Deck collision").with_id("crit"))
        .unwrap();

    // The WARN event was evicted to make room
    let evicted = warn.report().await;
    assert!(matches!(evicted, Err(SignalError::QueueOverflow { .. })));

    // Lane holds only CRITICAL now; the next event is refused
    let refused = coordinator.submit(Event::new(source, Severity::Critical, "Second collision"));
    assert_err!(refused);

    assert_ok!(running.report().await);
    let critical = critical.report().await.unwrap();
    assert_eq!(critical.decision().unwrap().action, "ABORT");

    let kinds = drain_kinds(&mut streams.ops);
    assert_eq!(kinds.iter().filter(|k| **k == "QueueOverflow").count(), 2);
    assert_eq!(coordinator.stats().overflows, 2);
}

/// E2E test: an inferred quantity crossing a trigger raises the tier
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_inference_trigger_raises_tier() {
    let policy = PolicyConfig::default().with_trigger(InferenceTrigger {
        output: "contamination_risk".to_string(),
        above: Some(0.8),
        below: None,
        raise_to: Severity::Critical,
    });
    let (coordinator, mut streams) = LoopCoordinator::new(config().with_policy(policy)).unwrap();
    coordinator.reload_corpus(lab_corpus()).unwrap();

    let spec = ModelSpec {
        id: "contamination_v1".to_string(),
        input_channels: vec!["turbidity".to_string()],
        targets: vec!["contamination_risk".to_string()],
        physics_constraints: BTreeMap::new(),
        kind: ModelKind::Classification,
    };
    let model = LinearModel {
        weights: vec![vec![2.0]],
        bias: vec![-1.0],
        activation: Default::default(),
    };
    coordinator.load_model(LoadedModel::new(spec, Arc::new(model)).unwrap());

    coordinator.observe_telemetry("Bioreactor-01", "turbidity", 0.95, signal_core::types::now());
    let report = coordinator
        .submit(
            Event::new("Bioreactor-01", Severity::Error, "Foam sensor tripped").with_id("evt-foam"),
        )
        .unwrap()
        .report()
        .await
        .unwrap();

    // 2.0 * 0.95 - 1.0 = 0.9, inside the classification range
    let risk = report.inference.as_ref().unwrap().get("contamination_risk").unwrap();
    assert!((risk.value - 0.9).abs() < 1e-9);
    let decision = report.decision().unwrap();
    assert_eq!(decision.action, "ABORT");
    assert_eq!(decision.provenance, Provenance::PolicyDefault);

    // Telemetry and the inferred value both reach the sync stream
    let first = streams.sync.recv().await.unwrap();
    assert_eq!(first.field, "turbidity");
    let second = streams.sync.recv().await.unwrap();
    assert_eq!(second.field, "contamination_risk");
}

/// E2E test: corpus and model load from the paths named in config
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_config_loads_corpus_and_model() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.json");
    let spec_path = dir.path().join("titer.toml");
    let artifact_path = dir.path().join("titer.json");

    std::fs::write(
        &corpus_path,
        serde_json::json!({
            "documents": [
                {"id": "SOP-104", "content": "ERR_VAC_04 Aspiration timeout", "recommended_action": "RETRY(speed=0.5)"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        &spec_path,
        r#"
id = "titer_v2"
input_channels = ["temperature", "ph"]
targets = ["titer_g_l"]

[physics_constraints]
min_titer_g_l = 0.0
"#,
    )
    .unwrap();
    std::fs::write(&artifact_path, r#"{"weights": [[0.1, -2.0]], "bias": [1.0]}"#).unwrap();

    let mut cfg = config();
    cfg.index.corpus_path = Some(corpus_path);
    cfg.inference.model_spec_path = Some(spec_path);
    cfg.inference.model_artifact_path = Some(artifact_path);

    let (coordinator, _streams) = LoopCoordinator::new(cfg).unwrap();
    assert_eq!(coordinator.index().len(), 1);
    assert_eq!(coordinator.runner().current().unwrap().id(), "titer_v2");

    coordinator.observe_telemetry("Bioreactor-01", "temperature", 37.0, signal_core::types::now());
    coordinator.observe_telemetry("Bioreactor-01", "ph", 7.0, signal_core::types::now());

    let report = coordinator
        .submit(aspiration_error("Bioreactor-01", "evt-1"))
        .unwrap()
        .report()
        .await
        .unwrap();

    // 0.1 * 37 - 2.0 * 7 + 1 = -9.3, clamped to the physical minimum
    let titer = report.inference.as_ref().unwrap().get("titer_g_l").unwrap();
    assert_eq!(titer.value, 0.0);
    assert!(titer.clamped);
    assert_eq!(report.decision().unwrap().action, "RETRY");
}

//! Cycle engine integration tests.
//!
//! Drive full cycles through the public API with scripted probes and a
//! recording sink. Timing tests run on a paused Tokio clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use graphite_agent::{
    AgentData, ApplicationConfig, CounterState, CycleController, Dispatcher, InstanceConfig,
    InstanceId, MetricField, MetricValue, MetricsSink, MinMaxKey, Probe, ProbeContext, ProbeEntry,
    ProbeError, ProbeRegistry, Reading, SendTags, SinkError,
};

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Sent {
    metric: String,
    value: f64,
    tags: SendTags,
}

#[derive(Clone, Default)]
struct RecordingSink {
    sent: Arc<Mutex<Vec<Sent>>>,
    fail_field: Option<MetricField>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl MetricsSink for RecordingSink {
    async fn send(&self, metric: &str, value: f64, tags: &SendTags) -> Result<(), SinkError> {
        if self.fail_field == Some(tags.field) {
            return Err(SinkError::Timeout(Duration::from_secs(2)));
        }
        self.sent.lock().unwrap().push(Sent {
            metric: metric.to_string(),
            value,
            tags: tags.clone(),
        });
        Ok(())
    }
}

type PriorLog = Arc<Mutex<Vec<Option<CounterState>>>>;

/// Probe scripted by its instance config.
///
/// Keys: `guid`, `delay_secs`, `values` (one per cycle, cycled), `metrics`
/// (metric keys per reading), `fail_from` (first failing generation).
/// Counter state holds a `generation` counter that grows by one per
/// successful cycle.
struct ScriptedProbe {
    name: String,
    guid: String,
    delay: Duration,
    values: Vec<f64>,
    metrics: usize,
    fail_from: Option<f64>,
    prior: Option<CounterState>,
    seen_priors: PriorLog,
}

impl ScriptedProbe {
    fn generation(&self) -> f64 {
        self.prior
            .as_ref()
            .and_then(|p| p.get("generation"))
            .map_or(1.0, |s| s.value + 1.0)
    }
}

#[async_trait::async_trait]
impl Probe for ScriptedProbe {
    async fn poll(&mut self) -> Result<(), ProbeError> {
        self.seen_priors.lock().unwrap().push(self.prior.clone());
        tokio::time::sleep(self.delay).await;
        if self.fail_from.is_some_and(|from| self.generation() >= from) {
            return Err(ProbeError::Parse("scripted failure".into()));
        }
        Ok(())
    }

    fn values(&self) -> Vec<Reading> {
        let index = (self.generation() as usize - 1) % self.values.len();
        let value = self.values[index];

        let mut reading = Reading::new(&self.name, &self.guid);
        for i in 0..self.metrics {
            reading.insert(format!("Component/Metric{i}[units]"), MetricValue::gauge(value));
        }
        vec![reading]
    }

    fn counter_state(&self) -> CounterState {
        let mut state = CounterState::new();
        state.record("generation", self.generation(), Utc::now());
        state
    }
}

fn scripted_registry() -> (ProbeRegistry, PriorLog) {
    let seen: PriorLog = Arc::default();
    let log = Arc::clone(&seen);

    let mut registry = ProbeRegistry::new();
    registry.register_builtin(
        "scripted",
        move |ctx: ProbeContext| -> Result<Box<dyn Probe>, ProbeError> {
            let cfg = &ctx.config;
            let num = |key: &str| cfg.get(key).and_then(|v| v.as_f64());
            let values: Vec<f64> = cfg
                .get("values")
                .and_then(|v| v.as_array())
                .map(|list| list.iter().filter_map(|v| v.as_f64()).collect())
                .filter(|list: &Vec<f64>| !list.is_empty())
                .unwrap_or_else(|| vec![1.0]);

            Ok(Box::new(ScriptedProbe {
                name: ctx.instance_name().to_string(),
                guid: cfg
                    .get("guid")
                    .and_then(|v| v.as_str())
                    .unwrap_or("scripted")
                    .to_string(),
                delay: Duration::from_secs_f64(num("delay_secs").unwrap_or(0.0)),
                values,
                metrics: num("metrics").unwrap_or(1.0) as usize,
                fail_from: num("fail_from"),
                prior: ctx.prior.clone(),
                seen_priors: Arc::clone(&log),
            }))
        },
    );
    (registry, seen)
}

fn instance(value: serde_json::Value) -> InstanceConfig {
    value.as_object().cloned().unwrap_or_default()
}

fn agent() -> AgentData {
    AgentData {
        host: "web01.example.com".into(),
        pid: 42,
        version: "test".into(),
    }
}

fn controller(config: &ApplicationConfig, registry: &ProbeRegistry, sink: RecordingSink) -> CycleController<RecordingSink> {
    CycleController::new(config, registry, Dispatcher::new(sink, agent(), None))
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_instances_run_concurrently() {
    let config = ApplicationConfig::new("carbon").with_probe(
        "scripted",
        ProbeEntry::Many(vec![
            instance(serde_json::json!({"name": "a", "delay_secs": 5})),
            instance(serde_json::json!({"name": "b", "delay_secs": 5})),
        ]),
    );
    let (registry, _) = scripted_registry();
    let mut controller = controller(&config, &registry, RecordingSink::default());

    let report = controller.run_cycle().await;

    assert_eq!(report.spawned, 2);
    assert_eq!(report.succeeded, 2);
    // Serial execution would take 10s.
    assert!(report.elapsed >= Duration::from_secs(5));
    assert!(report.elapsed < Duration::from_secs(6), "elapsed {:?}", report.elapsed);
    assert!(report.next_wake > Duration::from_secs(54));
    assert!(report.next_wake <= Duration::from_secs(55));
}

#[tokio::test(start_paused = true)]
async fn test_two_instance_scenario_routes_by_guid() {
    let config = ApplicationConfig::new("carbon")
        .with_wake_interval(Duration::from_secs(60))
        .with_probe(
            "scripted",
            ProbeEntry::Many(vec![
                instance(serde_json::json!({"name": "primary", "guid": "com.acme.newrelic_redis", "delay_secs": 2})),
                instance(serde_json::json!({"name": "replica", "guid": "replica_agent", "delay_secs": 3})),
            ]),
        );
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    let report = controller.run_cycle().await;

    assert_eq!(report.spawned, 2);
    assert_eq!(report.readings, 2);
    assert_eq!(report.batches, 1);
    assert_eq!(report.sent, 8);

    let sent = sink.sent();
    let primary: Vec<_> = sent.iter().filter(|s| s.tags.component == "primary").collect();
    let replica: Vec<_> = sent.iter().filter(|s| s.tags.component == "replica").collect();
    assert_eq!(primary.len(), 4);
    assert_eq!(replica.len(), 4);
    assert!(primary.iter().all(|s| s.tags.guid == "redis"));
    assert!(replica.iter().all(|s| s.tags.guid == "replica_agent"));
    assert!(sent.iter().all(|s| s.metric == "Metric0.units"));
    assert!(sent.iter().all(|s| s.tags.host == "web01_example_com"));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_instance_contributes_nothing() {
    let config = ApplicationConfig::new("carbon")
        .with_probe_timeout(Duration::from_secs(10))
        .with_probe(
            "scripted",
            ProbeEntry::Many(vec![
                instance(serde_json::json!({"name": "stuck", "delay_secs": 3600})),
                instance(serde_json::json!({"name": "quick"})),
            ]),
        );
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    let report = controller.run_cycle().await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(report.elapsed < Duration::from_secs(11));
    assert!(sink.sent().iter().all(|s| s.tags.component == "quick"));
    assert!(controller.counter_state(&InstanceId::new("scripted", "stuck")).is_none());
}

// =============================================================================
// Resolution and failures
// =============================================================================

#[tokio::test]
async fn test_unresolvable_probe_is_skipped() {
    let config = ApplicationConfig::new("carbon")
        .with_probe("nosuchprobe", ProbeEntry::One(instance(serde_json::json!({"name": "x"}))))
        .with_probe("acme.probes.Queue", ProbeEntry::One(instance(serde_json::json!({"name": "q"}))))
        .with_probe("scripted", ProbeEntry::One(instance(serde_json::json!({"name": "ok"}))));
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    assert_eq!(controller.probe_names(), vec!["scripted"]);

    let report = controller.run_cycle().await;
    assert_eq!(report.spawned, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(sink.sent().len(), 4);
}

#[tokio::test]
async fn test_failed_instance_contributes_no_readings() {
    let config = ApplicationConfig::new("carbon").with_probe(
        "scripted",
        ProbeEntry::Many(vec![
            instance(serde_json::json!({"name": "good"})),
            instance(serde_json::json!({"name": "bad", "fail_from": 1})),
            instance(serde_json::json!({"name": "good2"})),
        ]),
    );
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    let report = controller.run_cycle().await;

    assert_eq!(report.spawned, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.readings, report.succeeded);
    assert!(sink.sent().iter().all(|s| s.tags.component != "bad"));
}

#[tokio::test]
async fn test_nothing_configured_sends_nothing() {
    let config = ApplicationConfig::new("carbon");
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    let report = controller.run_cycle().await;

    assert_eq!(report.spawned, 0);
    assert_eq!(report.batches, 0);
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_failed_min_send_keeps_going() {
    let config = ApplicationConfig::new("carbon").with_probe(
        "scripted",
        ProbeEntry::One(instance(serde_json::json!({"name": "a", "metrics": 2}))),
    );
    let (registry, _) = scripted_registry();
    let sink = RecordingSink {
        fail_field: Some(MetricField::Min),
        ..RecordingSink::default()
    };
    let mut controller = controller(&config, &registry, sink.clone());

    let report = controller.run_cycle().await;

    assert_eq!(report.sent, 6);
    assert_eq!(report.send_failures, 2);
    let fields: Vec<_> = sink
        .sent()
        .iter()
        .filter(|s| s.metric == "Metric0.units")
        .map(|s| s.tags.field)
        .collect();
    assert_eq!(fields, vec![MetricField::Total, MetricField::Max, MetricField::Count]);
    assert!(sink.sent().iter().any(|s| s.metric == "Metric1.units"));
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test]
async fn test_batch_flushes_at_threshold() {
    let config = ApplicationConfig::new("carbon")
        .with_max_metrics(3)
        .with_probe(
            "scripted",
            ProbeEntry::Many(vec![
                instance(serde_json::json!({"name": "a", "metrics": 2})),
                instance(serde_json::json!({"name": "b", "metrics": 2})),
            ]),
        );
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    let report = controller.run_cycle().await;

    // 2 + 2 reaches 3 on the second reading; the remainder is empty.
    assert_eq!(report.readings, 2);
    assert_eq!(report.batches, 1);
    assert_eq!(report.sent, 16);
}

#[tokio::test]
async fn test_batch_remainder_is_sent() {
    let config = ApplicationConfig::new("carbon")
        .with_max_metrics(3)
        .with_probe(
            "scripted",
            ProbeEntry::Many(vec![
                instance(serde_json::json!({"name": "a", "metrics": 2})),
                instance(serde_json::json!({"name": "b", "metrics": 2})),
                instance(serde_json::json!({"name": "c", "metrics": 2})),
            ]),
        );
    let (registry, _) = scripted_registry();
    let mut controller = controller(&config, &registry, RecordingSink::default());

    let report = controller.run_cycle().await;

    // Two readings flush together, the third goes out at end of cycle.
    assert_eq!(report.readings, 3);
    assert_eq!(report.batches, 2);
    assert_eq!(report.sent, 24);
}

// =============================================================================
// Cross-cycle state
// =============================================================================

#[tokio::test]
async fn test_counter_state_carried_to_next_cycle() {
    let config = ApplicationConfig::new("carbon").with_probe(
        "scripted",
        ProbeEntry::One(instance(serde_json::json!({"name": "cache"}))),
    );
    let (registry, seen) = scripted_registry();
    let mut controller = controller(&config, &registry, RecordingSink::default());
    let id = InstanceId::new("scripted", "cache");

    controller.run_cycle().await;
    let after_first = controller.counter_state(&id).cloned().unwrap();
    assert_eq!(after_first.get("generation").unwrap().value, 1.0);

    controller.run_cycle().await;
    let after_second = controller.counter_state(&id).unwrap();
    assert_eq!(after_second.get("generation").unwrap().value, 2.0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].is_none());
    assert_eq!(seen[1].as_ref(), Some(&after_first));
}

#[tokio::test]
async fn test_failed_instance_keeps_previous_counter_state() {
    let config = ApplicationConfig::new("carbon").with_probe(
        "scripted",
        ProbeEntry::One(instance(serde_json::json!({"name": "flaky", "fail_from": 2}))),
    );
    let (registry, seen) = scripted_registry();
    let mut controller = controller(&config, &registry, RecordingSink::default());
    let id = InstanceId::new("scripted", "flaky");

    let first = controller.run_cycle().await;
    assert_eq!(first.succeeded, 1);
    let state = controller.counter_state(&id).cloned().unwrap();

    let second = controller.run_cycle().await;
    assert_eq!(second.failed, 1);
    assert_eq!(controller.counter_state(&id), Some(&state));

    // Third attempt still gets the state from the last success.
    controller.run_cycle().await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen[2].as_ref(), Some(&state));
}

#[tokio::test]
async fn test_running_max_across_cycles() {
    let config = ApplicationConfig::new("carbon").with_probe(
        "scripted",
        ProbeEntry::One(instance(serde_json::json!({"name": "db", "values": [5.0, 9.0, 3.0]}))),
    );
    let (registry, _) = scripted_registry();
    let sink = RecordingSink::default();
    let mut controller = controller(&config, &registry, sink.clone());

    let mut sent_max = Vec::new();
    for _ in 0..3 {
        sink.clear();
        controller.run_cycle().await;
        let max = sink
            .sent()
            .iter()
            .find(|s| s.tags.field == MetricField::Max)
            .map(|s| s.value);
        sent_max.push(max);
    }

    assert_eq!(sent_max, vec![Some(5.0), Some(9.0), Some(9.0)]);

    let key = MinMaxKey::new("scripted", "db", "Component/Metric0[units]");
    assert_eq!(controller.min_max().get(&key).and_then(|(_, max)| max), Some(9.0));
}

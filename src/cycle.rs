//! Cycle Controller
//!
//! Drives the agent: every wake interval it runs all configured probe
//! instances concurrently, waits for every one of them, feeds the readings
//! through the [`Aggregator`] and hands the resulting batches to the
//! [`Dispatcher`]. The time spent is subtracted from the next sleep.
//!
//! ```text
//! IDLE -> DISPATCH_PROBES -> AWAIT_COMPLETION -> AGGREGATE -> FLUSH -> SLEEP -> IDLE
//! ```
//!
//! Min/max history and per-instance counter state live on the controller and
//! are only touched after the concurrent phase of a cycle has joined.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::aggregate::{Aggregator, Batch, MinMaxState};
use crate::config::{ApplicationConfig, InstanceConfig, MIN_WAKE_INTERVAL};
use crate::dispatch::{DispatchSummary, Dispatcher, MetricsSink};
use crate::probe::{
    InstanceId, ProbeContext, ProbeError, ProbeFactory, ProbeRegistry, ProbeReport, ProbeRunner,
};
use crate::reading::CounterState;

/// Compute the sleep before the next cycle.
///
/// Returns the interval and whether the cycle overran. An overrun (less than
/// one second left) resets to the nominal interval instead of carrying the
/// deficit into the next cycle.
pub fn next_wake_interval(nominal: Duration, elapsed: Duration) -> (Duration, bool) {
    match nominal.checked_sub(elapsed) {
        Some(next) if next >= MIN_WAKE_INTERVAL => (next, false),
        _ => (nominal, true),
    }
}

/// Timing state carried between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleState {
    /// Configured time between cycle starts.
    pub nominal: Duration,
    /// Sleep computed at the end of the last cycle.
    pub next_wake: Duration,
    /// When the last cycle began.
    pub last_cycle_start: Option<Instant>,
}

impl CycleState {
    fn new(nominal: Duration) -> Self {
        Self {
            nominal,
            next_wake: nominal,
            last_cycle_start: None,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Instance tasks started.
    pub spawned: usize,
    /// Instances that published a report.
    pub succeeded: usize,
    /// Instances that failed, timed out or panicked.
    pub failed: usize,
    /// Readings handed to the aggregator.
    pub readings: usize,
    /// Non-empty batches dispatched.
    pub batches: usize,
    /// Successful sink sends.
    pub sent: usize,
    /// Failed sink sends.
    pub send_failures: usize,
    /// Wall time from cycle start to end of dispatch.
    pub elapsed: Duration,
    /// Sleep before the next cycle.
    pub next_wake: Duration,
}

/// One resolved probe entry and its instances.
struct ProbePlan {
    probe: String,
    factory: Arc<dyn ProbeFactory>,
    instances: Vec<(InstanceId, InstanceConfig)>,
}

/// Top-level driver of the collection loop.
pub struct CycleController<S> {
    plans: Vec<ProbePlan>,
    counters: HashMap<InstanceId, CounterState>,
    aggregator: Aggregator,
    dispatcher: Dispatcher<S>,
    probe_timeout: Duration,
    state: CycleState,
}

impl<S: MetricsSink> std::fmt::Debug for CycleController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleController")
            .field("probes", &self.probe_names())
            .field("instances", &self.instance_count())
            .field("probe_timeout", &self.probe_timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S: MetricsSink> CycleController<S> {
    /// Resolve every configured probe entry once.
    ///
    /// Entries that cannot be resolved are logged and left out; they are
    /// never retried.
    pub fn new(config: &ApplicationConfig, registry: &ProbeRegistry, dispatcher: Dispatcher<S>) -> Self {
        let mut plans = Vec::new();

        for (probe, entry) in config.probe_entries() {
            let factory = match registry.resolve(probe) {
                Ok(factory) => factory,
                Err(e) => {
                    tracing::error!(probe = %probe, error = %e, "Enabled plugin not available");
                    continue;
                }
            };

            let instances: Vec<_> = entry
                .instances()
                .iter()
                .map(|cfg| (InstanceId::for_config(probe, cfg), cfg.clone()))
                .collect();

            tracing::info!(probe = %probe, instances = instances.len(), "Enabled plugin");
            plans.push(ProbePlan {
                probe: probe.to_string(),
                factory,
                instances,
            });
        }

        Self {
            plans,
            counters: HashMap::new(),
            aggregator: Aggregator::new(config.max_metrics_per_request),
            dispatcher,
            probe_timeout: config.probe_timeout(),
            state: CycleState::new(config.wake_interval()),
        }
    }

    /// Names of the probes that resolved.
    pub fn probe_names(&self) -> Vec<&str> {
        self.plans.iter().map(|p| p.probe.as_str()).collect()
    }

    /// Total configured instances across resolved probes.
    pub fn instance_count(&self) -> usize {
        self.plans.iter().map(|p| p.instances.len()).sum()
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    /// Counter state last returned by an instance.
    pub fn counter_state(&self, instance: &InstanceId) -> Option<&CounterState> {
        self.counters.get(instance)
    }

    pub fn min_max(&self) -> &MinMaxState {
        self.aggregator.min_max()
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Run one full cycle: probes, aggregation, dispatch.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();
        self.state.last_cycle_start = Some(start);
        let mut report = CycleReport::default();

        let reports = self.run_probes(&mut report).await;
        report.succeeded = reports.len();
        report.failed = report.spawned - report.succeeded;

        let mut summary = DispatchSummary::default();
        for probe_report in reports {
            self.counters
                .insert(probe_report.instance, probe_report.counter_state);

            for reading in probe_report.readings {
                report.readings += 1;
                if let Some(batch) = self.aggregator.push(reading) {
                    self.flush(batch, &mut report, &mut summary).await;
                }
            }
        }
        let remainder = self.aggregator.finish();
        self.flush(remainder, &mut report, &mut summary).await;

        report.sent = summary.sent;
        report.send_failures = summary.failed;
        report.elapsed = start.elapsed();

        let (next_wake, overran) = next_wake_interval(self.state.nominal, report.elapsed);
        if overran {
            tracing::warn!(
                elapsed_secs = report.elapsed.as_secs_f64(),
                nominal_secs = self.state.nominal.as_secs(),
                "Poll interval exceeded, resetting next wake to nominal"
            );
        }
        self.state.next_wake = next_wake;
        report.next_wake = next_wake;

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            sent = report.sent,
            "Stats processed in {:.2} seconds, next wake in {} seconds",
            report.elapsed.as_secs_f64(),
            next_wake.as_secs()
        );

        report
    }

    /// Spawn every instance, wait for all of them and drain the results.
    async fn run_probes(&self, report: &mut CycleReport) -> Vec<ProbeReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for plan in &self.plans {
            for (instance, config) in &plan.instances {
                let ctx = ProbeContext::new(config.clone(), self.state.nominal)
                    .with_prior(self.counters.get(instance).cloned());
                let runner = ProbeRunner::new(
                    Arc::clone(&plan.factory),
                    instance.clone(),
                    ctx,
                    self.probe_timeout,
                );
                tasks.spawn(runner.run_and_publish(tx.clone()));
                report.spawned += 1;
            }
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                let error = ProbeError::Panicked(e.to_string());
                tracing::error!(error = %error, "Probe task did not complete");
            }
        }

        let mut reports = Vec::with_capacity(report.spawned);
        while let Some(probe_report) = rx.recv().await {
            reports.push(probe_report);
        }
        reports
    }

    async fn flush(&self, batch: Batch, report: &mut CycleReport, summary: &mut DispatchSummary) {
        if !batch.is_empty() {
            report.batches += 1;
        }
        summary.merge(self.dispatcher.dispatch(&batch).await);
    }

    /// Loop until `shutdown` resolves.
    ///
    /// Shutdown is only observed while sleeping; a running cycle always
    /// finishes first.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let report = self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(report.next_wake) => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping cycle loop");
                    break;
                }
            }
        }
    }
}

//! Executes one probe instance for one cycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, timeout};

use crate::config::{InstanceConfig, instance_name};
use crate::probe::{ProbeContext, ProbeError, ProbeFactory};
use crate::reading::{CounterState, Reading};

/// `probe:instance` identity of a configured instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(probe: &str, instance: &str) -> Self {
        Self(format!("{probe}:{instance}"))
    }

    /// Identity for an instance config under a probe entry.
    pub fn for_config(probe: &str, config: &InstanceConfig) -> Self {
        Self::new(probe, instance_name(config))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful run publishes on the result queue.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub instance: InstanceId,
    pub readings: Vec<Reading>,
    pub counter_state: CounterState,
}

/// One instance, ready to run for one cycle.
pub struct ProbeRunner {
    factory: Arc<dyn ProbeFactory>,
    instance: InstanceId,
    ctx: ProbeContext,
    timeout: Duration,
}

impl fmt::Debug for ProbeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeRunner")
            .field("instance", &self.instance)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProbeRunner {
    pub fn new(
        factory: Arc<dyn ProbeFactory>,
        instance: InstanceId,
        ctx: ProbeContext,
        timeout: Duration,
    ) -> Self {
        Self {
            factory,
            instance,
            ctx,
            timeout,
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Construct, poll and read the probe once, bounded by the timeout.
    ///
    /// # Errors
    /// Returns the probe's error, or `ProbeError::Timeout` on expiry.
    pub async fn run(self) -> Result<ProbeReport, ProbeError> {
        let Self {
            factory,
            instance,
            ctx,
            timeout: limit,
        } = self;

        let work = async move {
            let mut probe = factory.create(ctx)?;
            probe.poll().await?;
            Ok::<_, ProbeError>((probe.values(), probe.counter_state()))
        };

        let (readings, counter_state) = timeout(limit, work)
            .await
            .map_err(|_| ProbeError::Timeout(limit))??;

        Ok(ProbeReport {
            instance,
            readings,
            counter_state,
        })
    }

    /// Run and push the report onto the result queue.
    ///
    /// Failures stop here: they are logged and nothing is published.
    /// Returns whether a report was published.
    pub async fn run_and_publish(self, results: UnboundedSender<ProbeReport>) -> bool {
        let instance = self.instance.clone();
        let start = Instant::now();
        tracing::debug!(instance = %instance, "Running probe");

        match self.run().await {
            Ok(report) => {
                tracing::debug!(
                    instance = %instance,
                    readings = report.readings.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Probe succeeded"
                );
                if results.send(report).is_err() {
                    tracing::warn!(instance = %instance, "Result queue closed, dropping report");
                    return false;
                }
                true
            }
            Err(ProbeError::Timeout(limit)) => {
                tracing::warn!(
                    instance = %instance,
                    timeout_ms = limit.as_millis() as u64,
                    "Probe timed out"
                );
                false
            }
            Err(e) => {
                tracing::error!(instance = %instance, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Probe;
    use crate::reading::MetricValue;
    use chrono::Utc;
    use tokio::sync::mpsc;

    struct StaticProbe {
        name: String,
        prior: Option<CounterState>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Probe for StaticProbe {
        async fn poll(&mut self) -> Result<(), ProbeError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProbeError::Parse("garbage".into()));
            }
            Ok(())
        }

        fn values(&self) -> Vec<Reading> {
            vec![Reading::new(&self.name, "static").with_metric("up", MetricValue::gauge(1.0))]
        }

        fn counter_state(&self) -> CounterState {
            let mut state = CounterState::new();
            let seen = self.prior.as_ref().map_or(0, |p| p.len());
            state.record(format!("seen_{seen}"), 1.0, Utc::now());
            state
        }
    }

    fn factory(delay: Duration, fail: bool) -> Arc<dyn ProbeFactory> {
        Arc::new(
            move |ctx: ProbeContext| -> Result<Box<dyn crate::probe::Probe>, ProbeError> {
                Ok(Box::new(StaticProbe {
                    name: ctx.instance_name().to_string(),
                    prior: ctx.prior,
                    delay,
                    fail,
                }))
            },
        )
    }

    fn runner(delay: Duration, fail: bool, limit: Duration) -> ProbeRunner {
        let mut config = InstanceConfig::new();
        config.insert("name".into(), serde_json::json!("one"));
        let id = InstanceId::for_config("static", &config);
        let ctx = ProbeContext::new(config, Duration::from_secs(60));
        ProbeRunner::new(factory(delay, fail), id, ctx, limit)
    }

    #[test]
    fn test_instance_id() {
        assert_eq!(InstanceId::new("redis", "cache").to_string(), "redis:cache");
        let id = InstanceId::for_config("redis", &InstanceConfig::new());
        assert_eq!(id.as_str(), "redis:unnamed");
    }

    #[tokio::test]
    async fn test_run_success() {
        let report = runner(Duration::ZERO, false, Duration::from_secs(1))
            .run()
            .await
            .unwrap();
        assert_eq!(report.instance.as_str(), "static:one");
        assert_eq!(report.readings.len(), 1);
        assert_eq!(report.readings[0].name, "one");
        assert!(report.counter_state.get("seen_0").is_some());
    }

    #[tokio::test]
    async fn test_prior_state_reaches_probe() {
        let mut prior = CounterState::new();
        prior.record("a", 1.0, Utc::now());
        prior.record("b", 2.0, Utc::now());

        let mut r = runner(Duration::ZERO, false, Duration::from_secs(1));
        r.ctx = r.ctx.with_prior(Some(prior));
        let report = r.run().await.unwrap();
        assert!(report.counter_state.get("seen_2").is_some());
    }

    #[tokio::test]
    async fn test_failure_publishes_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let published = runner(Duration::ZERO, true, Duration::from_secs(1))
            .run_and_publish(tx)
            .await;
        assert!(!published);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failure() {
        let r = runner(Duration::from_secs(120), false, Duration::from_secs(5));
        let result = r.run().await;
        assert!(matches!(result, Err(ProbeError::Timeout(d)) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_success_publishes_report() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let published = runner(Duration::ZERO, false, Duration::from_secs(1))
            .run_and_publish(tx)
            .await;
        assert!(published);
        let report = rx.recv().await.unwrap();
        assert_eq!(report.instance.as_str(), "static:one");
    }
}

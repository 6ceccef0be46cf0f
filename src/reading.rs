//! Probe output types.
//!
//! - [`Reading`]: one named component reported by a probe, with its metrics
//! - [`MetricValue`]: the `{total, count, min, max}` shape of a single metric
//! - [`CounterState`]: per-instance samples carried between cycles so probes
//!   can turn cumulative counters into rates

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single metric observation.
///
/// `min` and `max` are optional: probes may fill them when they observed a
/// range themselves, otherwise the aggregator fills them from its running
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub total: f64,
    pub count: u64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl MetricValue {
    /// A point-in-time value observed once.
    pub fn gauge(value: f64) -> Self {
        Self {
            total: value,
            count: 1,
            min: None,
            max: None,
        }
    }

    /// Set an explicit observed range.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Set the sample count.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }
}

/// Output of one probe invocation for one named resource.
///
/// `guid` identifies the probe family and buckets min/max history together
/// with `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub name: String,
    pub guid: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl Reading {
    /// Create an empty reading.
    pub fn new(name: impl Into<String>, guid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guid: guid.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Add a metric, replacing any previous value under the same name.
    pub fn with_metric(mut self, metric: impl Into<String>, value: MetricValue) -> Self {
        self.metrics.insert(metric.into(), value);
        self
    }

    /// Add a metric in place.
    pub fn insert(&mut self, metric: impl Into<String>, value: MetricValue) {
        self.metrics.insert(metric.into(), value);
    }

    /// Number of metric keys carried by this reading.
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }
}

/// A cumulative counter value and when it was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterSample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Counter samples for one probe instance, keyed by metric.
///
/// The controller hands the state returned by cycle N back to the same
/// instance in cycle N+1. It is replaced wholesale, never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterState(BTreeMap<String, CounterSample>);

impl CounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CounterSample> {
        self.0.get(key)
    }

    /// Store a sample for the next cycle.
    pub fn record(&mut self, key: impl Into<String>, value: f64, at: DateTime<Utc>) {
        self.0.insert(key.into(), CounterSample { value, at });
    }

    /// Per-second rate of `value` against the prior sample under `key`.
    ///
    /// Returns `None` without a prior sample, when no time has passed, or
    /// when the counter went backwards (process restart on the target).
    pub fn rate(&self, key: &str, value: f64, now: DateTime<Utc>) -> Option<f64> {
        let prior = self.0.get(key)?;
        let elapsed = (now - prior.at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 || value < prior.value {
            return None;
        }
        Some((value - prior.value) / elapsed)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CounterSample)> {
        self.0.iter()
    }
}

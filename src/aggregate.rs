//! Cross-cycle min/max tracking and size-bounded batching.
//!
//! The [`Aggregator`] is only touched by the cycle controller after every
//! probe task of the cycle has joined, so it needs no locking.

use std::collections::HashMap;

use crate::reading::Reading;

/// Key of one running min/max pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MinMaxKey {
    pub guid: String,
    pub name: String,
    pub metric: String,
}

impl MinMaxKey {
    pub fn new(guid: &str, name: &str, metric: &str) -> Self {
        Self {
            guid: guid.to_string(),
            name: name.to_string(),
            metric: metric.to_string(),
        }
    }
}

/// Running `(min, max)` per `(guid, name, metric)` since process start.
#[derive(Debug, Clone, Default)]
pub struct MinMaxState {
    values: HashMap<MinMaxKey, (Option<f64>, Option<f64>)>,
}

impl MinMaxState {
    pub fn get(&self, key: &MinMaxKey) -> Option<(Option<f64>, Option<f64>)> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fold one reading into the running history and fill its unset min/max.
    ///
    /// The running min only moves once a baseline exists, and nothing ever
    /// installs one: a first observation is adopted as the reading's own min
    /// but is not stored as a baseline. A stored min of `0.0` is likewise
    /// passed over in favour of the current value when filling the reading.
    pub fn track(&mut self, reading: &mut Reading) {
        for (metric, value) in reading.metrics.iter_mut() {
            let key = MinMaxKey::new(&reading.guid, &reading.name, metric);
            let (mut min, mut max) = self.values.get(&key).copied().unwrap_or((None, None));
            let current = value.total;

            if let Some(prior_min) = min {
                if prior_min > current {
                    min = Some(current);
                }
            }

            if max.is_none_or(|prior_max| prior_max < current) {
                max = Some(current);
            }

            if value.min.is_none() {
                value.min = Some(min.filter(|m| *m != 0.0).unwrap_or(current));
            }

            if value.max.is_none() {
                value.max = max;
            }

            self.values.insert(key, (min, max));
        }
    }
}

/// Readings accumulated for one send, plus their metric count.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub readings: Vec<Reading>,
    pub metric_count: usize,
}

impl Batch {
    fn push(&mut self, reading: Reading) {
        self.metric_count += reading.metric_count();
        self.readings.push(reading);
    }

    pub fn is_empty(&self) -> bool {
        self.metric_count == 0
    }
}

/// Consumes a cycle's readings and yields batches to dispatch.
#[derive(Debug)]
pub struct Aggregator {
    min_max: MinMaxState,
    max_metrics: usize,
    batch: Batch,
}

impl Aggregator {
    /// `max_metrics` is the flush threshold; values below 1 are treated as 1.
    pub fn new(max_metrics: usize) -> Self {
        Self {
            min_max: MinMaxState::default(),
            max_metrics: max_metrics.max(1),
            batch: Batch::default(),
        }
    }

    /// Track min/max for `reading` and append it to the current batch.
    ///
    /// Returns the full batch once its metric count reaches the threshold;
    /// the caller dispatches it before pushing more.
    pub fn push(&mut self, mut reading: Reading) -> Option<Batch> {
        self.min_max.track(&mut reading);
        self.batch.push(reading);

        if self.batch.metric_count >= self.max_metrics {
            tracing::debug!(metrics = self.batch.metric_count, "Batch threshold reached");
            return Some(std::mem::take(&mut self.batch));
        }
        None
    }

    /// Take whatever is left, even if empty.
    pub fn finish(&mut self) -> Batch {
        tracing::debug!(
            metrics = self.batch.metric_count,
            "Done, will send remainder of metrics"
        );
        std::mem::take(&mut self.batch)
    }

    pub fn min_max(&self) -> &MinMaxState {
        &self.min_max
    }

    pub fn max_metrics(&self) -> usize {
        self.max_metrics
    }
}

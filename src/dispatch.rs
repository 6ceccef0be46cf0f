//! Dispatch Layer
//!
//! Sends completed batches to a [`MetricsSink`], one metric field at a time.
//!
//! # Components
//!
//! - [`Dispatcher`]: Normalizes names and fans each metric out into four sends
//! - [`MetricsSink`]: Backend contract, one independent call per value
//! - [`GraphiteSink`]: Carbon plaintext implementation

mod graphite;
pub mod normalize;
mod sink;

pub use graphite::GraphiteSink;
pub use sink::{MetricField, MetricsSink, SendTags, SinkError};

use serde::Serialize;

use crate::aggregate::Batch;
use crate::reading::MetricValue;

/// Identity of the running agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentData {
    pub host: String,
    pub pid: u32,
    pub version: String,
}

impl AgentData {
    /// Describe the current process.
    pub fn current() -> Self {
        Self {
            host: sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string()),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchSummary {
    pub fn merge(&mut self, other: DispatchSummary) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Fans batches out to a sink.
#[derive(Debug)]
pub struct Dispatcher<S> {
    sink: S,
    agent: AgentData,
    host_segment: String,
}

impl<S: MetricsSink> Dispatcher<S> {
    /// `localhost_name` replaces the host segment verbatim when set.
    pub fn new(sink: S, agent: AgentData, localhost_name: Option<&str>) -> Self {
        let host_segment = normalize::host_name(&agent.host, localhost_name);
        Self {
            sink,
            agent,
            host_segment,
        }
    }

    pub fn host_segment(&self) -> &str {
        &self.host_segment
    }

    pub fn agent(&self) -> &AgentData {
        &self.agent
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Send every metric of every reading in `batch`.
    ///
    /// Each metric becomes four sends (`total`, `max`, `min`, `count`).
    /// A failed send is logged and the loop moves on.
    pub async fn dispatch(&self, batch: &Batch) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        if batch.is_empty() {
            tracing::warn!("No metrics to send to Graphite this interval");
            return summary;
        }

        tracing::info!(metrics = batch.metric_count, "Sending metrics to Graphite");
        tracing::debug!(
            body = %serde_json::json!({"agent": &self.agent, "components": &batch.readings}),
            "Batch body"
        );

        for reading in &batch.readings {
            let guid = normalize::guid(&reading.guid);

            for (raw_metric, value) in &reading.metrics {
                let metric = normalize::metric_name(raw_metric);

                for (field, field_value) in fields(value) {
                    let Some(field_value) = field_value else {
                        tracing::debug!(metric = %metric, field = %field, "Field unset, skipping");
                        summary.skipped += 1;
                        continue;
                    };

                    let tags = SendTags {
                        guid: guid.clone(),
                        field,
                        component: reading.name.clone(),
                        host: self.host_segment.clone(),
                    };

                    match self.sink.send(&metric, field_value, &tags).await {
                        Ok(()) => summary.sent += 1,
                        Err(e) => {
                            tracing::error!(
                                metric = %metric,
                                field = %field,
                                component = %reading.name,
                                error = %e,
                                "Graphite error"
                            );
                            summary.failed += 1;
                        }
                    }
                }
            }
        }

        summary
    }
}

fn fields(value: &MetricValue) -> [(MetricField, Option<f64>); 4] {
    [
        (MetricField::Total, Some(value.total)),
        (MetricField::Max, value.max),
        (MetricField::Min, value.min),
        (MetricField::Count, Some(value.count as f64)),
    ]
}

//! Metrics sink contract.

use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Errors from a single send.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Could not connect to the backend.
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect or write exceeded the send timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// Write failed after connecting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Value cannot be represented on the wire.
    #[error("invalid value for '{metric}': {value}")]
    InvalidValue { metric: String, value: f64 },
}

/// Which aggregate of a metric a send carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricField {
    Total,
    Max,
    Min,
    Count,
}

/// Routing tags attached to every send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendTags {
    /// Probe family, with vendor prefixes stripped.
    pub guid: String,
    /// Aggregate carried by this send.
    pub field: MetricField,
    /// Reading (component) name.
    pub component: String,
    /// Host segment of the metric path.
    pub host: String,
}

/// Destination for individual metric values.
///
/// Each call is independent: a failure affects only that value.
#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    /// Send one value.
    async fn send(&self, metric: &str, value: f64, tags: &SendTags) -> Result<(), SinkError>;
}

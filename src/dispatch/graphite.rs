//! Carbon plaintext sink.
//!
//! Each send opens its own connection and writes one line:
//! `<prefix>.<host>.<guid>.<component>.<metric>_<field> <value> <timestamp>\n`

use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ApplicationConfig;
use crate::dispatch::normalize::path_segment;
use crate::dispatch::{MetricsSink, SendTags, SinkError};

/// Sends metrics to Carbon over the plaintext protocol.
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    host: String,
    port: u16,
    prefix: String,
    timeout: Duration,
}

impl GraphiteSink {
    pub fn new(host: impl Into<String>, port: u16, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            prefix: prefix.into(),
            timeout,
        }
    }

    /// Build from the engine settings.
    pub fn from_config(config: &ApplicationConfig) -> Self {
        Self::new(
            &config.graphite_host,
            config.graphite_port,
            &config.metric_prefix,
            config.graphite_timeout(),
        )
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full dotted path for one send.
    pub fn metric_path(&self, metric: &str, tags: &SendTags) -> String {
        format!(
            "{}.{}.{}.{}.{}_{}",
            self.prefix,
            path_segment(&tags.host),
            path_segment(&tags.guid),
            path_segment(&tags.component),
            path_segment(metric),
            tags.field
        )
    }

    /// Plaintext protocol line.
    pub fn format_line(&self, metric: &str, value: f64, tags: &SendTags, timestamp: i64) -> String {
        format!("{} {} {}\n", self.metric_path(metric, tags), value, timestamp)
    }
}

#[async_trait::async_trait]
impl MetricsSink for GraphiteSink {
    async fn send(&self, metric: &str, value: f64, tags: &SendTags) -> Result<(), SinkError> {
        if !value.is_finite() {
            return Err(SinkError::InvalidValue {
                metric: metric.to_string(),
                value,
            });
        }

        let line = self.format_line(metric, value, tags, Utc::now().timestamp());
        let endpoint = self.endpoint();

        let mut stream = timeout(self.timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
            .map_err(|source| SinkError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        timeout(self.timeout, async {
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| SinkError::Timeout(self.timeout))??;

        tracing::trace!(line = %line.trim_end(), "Sent to graphite");
        Ok(())
    }
}

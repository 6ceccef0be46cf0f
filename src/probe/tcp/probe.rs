//! TCP port probe.
//!
//! Measures TCP connection latency to a target address.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::DEFAULT_INSTANCE_NAME;
use crate::probe::{Probe, ProbeContext, ProbeError, ProbeFactory};
use crate::reading::{CounterState, MetricValue, Reading};

/// Guid shared by all TCP readings.
pub const TCP_GUID: &str = "tcp_agent";

/// Default connection timeout (3 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

const METRIC_AVAILABLE: &str = "Component/Connection/Available[bool]";
const METRIC_LATENCY: &str = "Component/Connection/Latency[ms]";

fn default_name() -> String {
    DEFAULT_INSTANCE_NAME.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Configuration for a TCP port probe instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Instance name (default: "unnamed").
    #[serde(default = "default_name")]
    pub name: String,
    /// Target host (IP address or hostname).
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Connect timeout (default: 3s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl TcpConfig {
    /// Create a new TCP probe configuration.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.host.trim().is_empty() {
            return Err(ProbeError::Config("tcp host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ProbeError::Config("tcp port must be non-zero".to_string()));
        }
        Ok(())
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TCP port probe.
///
/// Reports availability (1/0) and, when the connect succeeds, latency.
/// An unreachable target is an observation, not a probe failure.
#[derive(Debug)]
pub struct TcpProbe {
    config: TcpConfig,
    latency_ms: Option<f64>,
    polled: bool,
}

impl TcpProbe {
    pub fn new(config: TcpConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            config,
            latency_ms: None,
            polled: false,
        })
    }
}

#[async_trait::async_trait]
impl Probe for TcpProbe {
    async fn poll(&mut self) -> Result<(), ProbeError> {
        let target = self.config.target();
        let probe_timeout = self.config.timeout;

        let start = Instant::now();
        let result = timeout(probe_timeout, TcpStream::connect(&target)).await;
        let elapsed = start.elapsed();

        self.latency_ms = match result {
            Ok(Ok(_stream)) => {
                let ms = elapsed.as_secs_f64() * 1000.0;
                tracing::debug!(name = %self.config.name, target = %target, latency_ms = ms, "TCP probe successful");
                Some(ms)
            }
            Ok(Err(e)) => {
                tracing::warn!(name = %self.config.name, target = %target, error = %e, "TCP probe failed");
                None
            }
            Err(_) => {
                tracing::warn!(name = %self.config.name, target = %target, timeout_ms = probe_timeout.as_millis() as u64, "TCP probe timed out");
                None
            }
        };
        self.polled = true;
        Ok(())
    }

    fn values(&self) -> Vec<Reading> {
        if !self.polled {
            return Vec::new();
        }

        let available = if self.latency_ms.is_some() { 1.0 } else { 0.0 };
        let mut reading = Reading::new(&self.config.name, TCP_GUID)
            .with_metric(METRIC_AVAILABLE, MetricValue::gauge(available));
        if let Some(ms) = self.latency_ms {
            reading.insert(METRIC_LATENCY, MetricValue::gauge(ms));
        }
        vec![reading]
    }

    fn counter_state(&self) -> CounterState {
        CounterState::new()
    }
}

/// Builds [`TcpProbe`]s from instance configs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbeFactory;

impl ProbeFactory for TcpProbeFactory {
    fn create(&self, ctx: ProbeContext) -> Result<Box<dyn Probe>, ProbeError> {
        let config: TcpConfig = ctx.parse_config()?;
        Ok(Box::new(TcpProbe::new(config)?))
    }
}

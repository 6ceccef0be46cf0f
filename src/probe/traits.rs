//! Core probe traits and types.

use std::time::Duration;

use thiserror::Error;

use crate::config::{InstanceConfig, instance_name};
use crate::reading::{CounterState, Reading};

/// Errors that can occur while constructing or running a probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Network I/O error.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// Probe did not finish within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid instance configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Response could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Probe task panicked.
    #[error("probe panicked: {0}")]
    Panicked(String),
}

/// Everything a probe is constructed from for one cycle.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// Opaque instance configuration.
    pub config: InstanceConfig,
    /// Nominal poll interval the probe is invoked at.
    pub poll_interval: Duration,
    /// Counter state returned by this instance in the previous cycle.
    pub prior: Option<CounterState>,
}

impl ProbeContext {
    pub fn new(config: InstanceConfig, poll_interval: Duration) -> Self {
        Self {
            config,
            poll_interval,
            prior: None,
        }
    }

    /// Attach prior counter state.
    pub fn with_prior(mut self, prior: Option<CounterState>) -> Self {
        self.prior = prior;
        self
    }

    /// Instance name from the config, or the default literal.
    pub fn instance_name(&self) -> &str {
        instance_name(&self.config)
    }

    /// Deserialize the opaque config into a typed probe config.
    ///
    /// # Errors
    /// Returns `ProbeError::Config` when the config does not match `T`.
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProbeError> {
        serde_json::from_value(serde_json::Value::Object(self.config.clone()))
            .map_err(|e| ProbeError::Config(e.to_string()))
    }
}

/// A probe fetches and parses metrics from one external service.
///
/// A fresh probe is built for every cycle. The runner calls [`Probe::poll`]
/// once, then collects [`Probe::values`] and [`Probe::counter_state`].
///
/// # Error Handling
///
/// - **Target down** (connection refused, bad status): report it as a metric
///   when the probe has a natural "available" signal and return `Ok(())`.
/// - **Probe cannot work** (bad config, unparseable payload): return `Err`.
///   The instance contributes nothing this cycle and keeps its prior
///   counter state.
#[async_trait::async_trait]
pub trait Probe: Send {
    /// Fetch from the target. Side-effecting, may fail.
    async fn poll(&mut self) -> Result<(), ProbeError>;

    /// Readings reflecting the last successful `poll()`.
    fn values(&self) -> Vec<Reading>;

    /// Counter state to hand to this instance next cycle.
    fn counter_state(&self) -> CounterState;
}

/// Builds a probe for one instance and cycle.
pub trait ProbeFactory: Send + Sync + 'static {
    /// Construct the probe.
    ///
    /// # Errors
    /// Returns `ProbeError::Config` when the instance config is invalid.
    fn create(&self, ctx: ProbeContext) -> Result<Box<dyn Probe>, ProbeError>;
}

impl<F> ProbeFactory for F
where
    F: Fn(ProbeContext) -> Result<Box<dyn Probe>, ProbeError> + Send + Sync + 'static,
{
    fn create(&self, ctx: ProbeContext) -> Result<Box<dyn Probe>, ProbeError> {
        self(ctx)
    }
}

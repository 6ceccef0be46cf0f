//! Application configuration structures.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, deserialize_opt_duration, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default time between cycle starts (60 seconds).
pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum allowed wake interval (1 second).
pub const MIN_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Default Carbon plaintext port.
pub const DEFAULT_GRAPHITE_PORT: u16 = 2003;

/// Default per-send timeout (2 seconds).
pub const DEFAULT_GRAPHITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-instance probe timeout (30 seconds).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum metrics per batch.
pub const DEFAULT_MAX_METRICS_PER_REQUEST: usize = 10_000;

/// Default root namespace for metric paths.
pub const DEFAULT_METRIC_PREFIX: &str = "graphite_agent";

/// Instance name used when an instance config has no `name`.
pub const DEFAULT_INSTANCE_NAME: &str = "unnamed";

/// Keys under `application` that configure the engine rather than a probe.
pub const ENGINE_KEYS: &[&str] = &[
    "graphite_host",
    "graphite_port",
    "poll_interval",
    "wake_interval",
    "localhost_name",
    "graphite_timeout",
    "probe_timeout",
    "max_metrics_per_request",
    "metric_prefix",
];

fn default_graphite_port() -> u16 {
    DEFAULT_GRAPHITE_PORT
}

fn default_max_metrics() -> usize {
    DEFAULT_MAX_METRICS_PER_REQUEST
}

fn default_metric_prefix() -> String {
    DEFAULT_METRIC_PREFIX.to_string()
}

// =============================================================================
// Probe entries
// =============================================================================

/// Opaque configuration of one probe instance.
pub type InstanceConfig = serde_json::Map<String, serde_json::Value>;

/// A configured probe: a single instance or a list of instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeEntry {
    Many(Vec<InstanceConfig>),
    One(InstanceConfig),
}

impl ProbeEntry {
    /// Instance configs in declaration order.
    pub fn instances(&self) -> &[InstanceConfig] {
        match self {
            Self::Many(list) => list,
            Self::One(single) => std::slice::from_ref(single),
        }
    }
}

/// Instance name taken from the `name` key, or [`DEFAULT_INSTANCE_NAME`].
pub fn instance_name(config: &InstanceConfig) -> &str {
    config
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_INSTANCE_NAME)
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Engine settings plus one entry per enabled probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Carbon host receiving metrics. Required, but may come from the CLI.
    #[serde(default)]
    pub graphite_host: String,

    /// Carbon plaintext port (default: 2003).
    #[serde(default = "default_graphite_port")]
    pub graphite_port: u16,

    /// Nominal time between cycle starts (default: 60s).
    #[serde(default, deserialize_with = "deserialize_opt_duration", skip_serializing)]
    pub wake_interval: Option<Duration>,

    /// Legacy alias for `wake_interval`.
    #[serde(default, deserialize_with = "deserialize_opt_duration", skip_serializing)]
    pub poll_interval: Option<Duration>,

    /// Overrides the host segment of every metric path.
    #[serde(default)]
    pub localhost_name: Option<String>,

    /// Per-send timeout (default: 2s).
    #[serde(default, deserialize_with = "deserialize_opt_duration", skip_serializing)]
    pub graphite_timeout: Option<Duration>,

    /// Per-instance probe timeout (default: 30s).
    #[serde(default, deserialize_with = "deserialize_opt_duration", skip_serializing)]
    pub probe_timeout: Option<Duration>,

    /// Flush threshold for a batch (default: 10000).
    #[serde(default = "default_max_metrics")]
    pub max_metrics_per_request: usize,

    /// Root namespace for metric paths (default: "graphite_agent").
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// Everything else: probe name -> instance config(s).
    #[serde(flatten)]
    pub probes: BTreeMap<String, ProbeEntry>,
}

impl ApplicationConfig {
    /// Create a configuration with defaults and no probes.
    pub fn new(graphite_host: impl Into<String>) -> Self {
        Self {
            graphite_host: graphite_host.into(),
            graphite_port: DEFAULT_GRAPHITE_PORT,
            wake_interval: None,
            poll_interval: None,
            localhost_name: None,
            graphite_timeout: None,
            probe_timeout: None,
            max_metrics_per_request: DEFAULT_MAX_METRICS_PER_REQUEST,
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            probes: BTreeMap::new(),
        }
    }

    /// Effective wake interval: `wake_interval`, then `poll_interval`, then 60s.
    pub fn wake_interval(&self) -> Duration {
        self.wake_interval
            .or(self.poll_interval)
            .unwrap_or(DEFAULT_WAKE_INTERVAL)
    }

    pub fn graphite_timeout(&self) -> Duration {
        self.graphite_timeout.unwrap_or(DEFAULT_GRAPHITE_TIMEOUT)
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT)
    }

    /// Probe entries, excluding engine keys.
    pub fn probe_entries(&self) -> impl Iterator<Item = (&str, &ProbeEntry)> {
        self.probes
            .iter()
            .filter(|(name, _)| !ENGINE_KEYS.contains(&name.as_str()))
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Set the wake interval.
    pub fn with_wake_interval(mut self, interval: Duration) -> Self {
        self.wake_interval = Some(interval);
        self
    }

    /// Set the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the batch flush threshold.
    pub fn with_max_metrics(mut self, max: usize) -> Self {
        self.max_metrics_per_request = max;
        self
    }

    /// Set the host override.
    pub fn with_localhost_name(mut self, name: impl Into<String>) -> Self {
        self.localhost_name = Some(name.into());
        self
    }

    /// Add a probe entry.
    pub fn with_probe(mut self, name: impl Into<String>, entry: ProbeEntry) -> Self {
        self.probes.insert(name.into(), entry);
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graphite_host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "graphite_host cannot be empty".to_string(),
            ));
        }

        if self.graphite_port == 0 {
            return Err(ConfigError::Validation(
                "graphite_port must be non-zero".to_string(),
            ));
        }

        if self.wake_interval() < MIN_WAKE_INTERVAL {
            return Err(ConfigError::Validation(format!(
                "wake_interval must be at least {:?}",
                MIN_WAKE_INTERVAL
            )));
        }

        if self.max_metrics_per_request == 0 {
            return Err(ConfigError::Validation(
                "max_metrics_per_request must be positive".to_string(),
            ));
        }

        if self.metric_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "metric_prefix cannot be empty".to_string(),
            ));
        }

        for (probe, entry) in self.probe_entries() {
            let mut seen_names = HashSet::new();
            for instance in entry.instances() {
                if let Some(name) = instance.get("name") {
                    if !name.is_string() {
                        return Err(ConfigError::Validation(format!(
                            "probe '{}': instance name must be a string, got {}",
                            probe, name
                        )));
                    }
                }
                let name = instance_name(instance);
                if !seen_names.insert(name) {
                    tracing::warn!(
                        probe = %probe,
                        instance = %name,
                        "Duplicate instance name, instances will share counter state"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Top-level agent configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Engine settings and probe entries.
    pub application: ApplicationConfig,
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file without validating it.
    ///
    /// For callers that apply overrides first and call [`Self::validate`]
    /// afterwards.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand `${VAR}` references and parse, without validating.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(&expand_env_vars(content))?)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.application.validate()
    }
}

/// Annotated sample printed by `graphite-agent --configure`.
pub const SAMPLE_CONFIG: &str = r#"# graphite-agent configuration
application:
  # Carbon plaintext receiver
  graphite_host: ${GRAPHITE_HOST:-localhost}
  graphite_port: 2003
  # Seconds between cycle starts (or a duration such as "1m")
  wake_interval: 60
  # Per-send and per-probe timeouts
  graphite_timeout: 2s
  probe_timeout: 30s
  max_metrics_per_request: 10000
  # localhost_name: web01

  # One entry per probe: a single instance or a list of instances
  tcp:
    - name: redis
      host: 127.0.0.1
      port: 6379
      timeout: 3s
  http:
    name: status
    url: http://127.0.0.1:8080/status
    expected_status: 200
    extract:
      - name: Requests/Total[req]
        path: $.requests
        derive: true
"#;

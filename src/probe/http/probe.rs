//! HTTP endpoint probe.
//!
//! Measures endpoint latency, validates the response status and optionally
//! extracts numeric values from a JSON body.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json_path::JsonPath;

use crate::config::{DEFAULT_INSTANCE_NAME, expand_env_vars};
use crate::probe::{Probe, ProbeContext, ProbeError, ProbeFactory};
use crate::reading::{CounterState, MetricValue, Reading};

/// Guid shared by all HTTP readings.
pub const HTTP_GUID: &str = "http_agent";

/// Default request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default expected HTTP status code.
const DEFAULT_EXPECTED_STATUS: u16 = 200;

const METRIC_AVAILABLE: &str = "Component/Http/Available[bool]";
const METRIC_LATENCY: &str = "Component/Http/Latency[ms]";
const METRIC_STATUS: &str = "Component/Http/Status[code]";

fn default_name() -> String {
    DEFAULT_INSTANCE_NAME.to_string()
}

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// HTTP method for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
}

impl HttpMethod {
    /// Get the method name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
        }
    }
}

/// A numeric value pulled out of a JSON response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricExtraction {
    /// Metric name to report the value under.
    pub name: String,
    /// JSONPath expression selecting the value.
    pub path: String,
    /// Report the per-second rate of a cumulative counter instead of the raw value.
    #[serde(default)]
    pub derive: bool,
}

/// Configuration for an HTTP probe instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Instance name (default: "unnamed").
    #[serde(default = "default_name")]
    pub name: String,
    /// Target URL (HTTP or HTTPS).
    pub url: String,
    /// HTTP method to use (default: GET).
    #[serde(default)]
    pub method: HttpMethod,
    /// Expected HTTP status code (default: 200).
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Request headers with environment variable substitution support.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Values to extract from a JSON body.
    #[serde(default)]
    pub extract: Vec<MetricExtraction>,
}

impl HttpConfig {
    /// Create a new HTTP probe configuration.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: HttpMethod::default(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
            extract: Vec::new(),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a value extraction.
    pub fn with_extraction(mut self, name: impl Into<String>, path: impl Into<String>, derive: bool) -> Self {
        self.extract.push(MetricExtraction {
            name: name.into(),
            path: path.into(),
            derive,
        });
        self
    }

    /// Validate URL and JSONPath expressions.
    pub fn validate(&self) -> Result<(), ProbeError> {
        url::Url::parse(&self.url)
            .map_err(|e| ProbeError::Config(format!("invalid URL '{}': {}", self.url, e)))?;
        self.compile_paths()?;
        Ok(())
    }

    /// Parse every extraction path, in `extract` order.
    fn compile_paths(&self) -> Result<Vec<JsonPath>, ProbeError> {
        self.extract
            .iter()
            .map(|extraction| {
                JsonPath::parse(&extraction.path).map_err(|e| {
                    ProbeError::Config(format!("invalid JSONPath '{}': {}", extraction.path, e))
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Observation {
    latency_ms: f64,
    status: Option<u16>,
    available: bool,
    extracted: BTreeMap<String, f64>,
}

/// HTTP endpoint probe.
#[derive(Debug)]
pub struct HttpProbe {
    config: HttpConfig,
    paths: Vec<JsonPath>,
    client: Client,
    prior: CounterState,
    next: CounterState,
    observation: Option<Observation>,
}

impl HttpProbe {
    /// Samples in `prior` are carried forward until a cycle observes a
    /// newer value for the same key, so an outage does not reset rates.
    pub fn new(config: HttpConfig, client: Client, prior: Option<CounterState>) -> Result<Self, ProbeError> {
        config.validate()?;
        let paths = config.compile_paths()?;
        let prior = prior.unwrap_or_default();
        Ok(Self {
            config,
            paths,
            client,
            next: prior.clone(),
            prior,
            observation: None,
        })
    }

    /// Apply configured extractions to a JSON body.
    ///
    /// Derived values record the raw counter for next cycle and report a
    /// rate only once a prior sample exists.
    fn extract(&mut self, body: &str, now: DateTime<Utc>) -> Result<BTreeMap<String, f64>, ProbeError> {
        let json: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ProbeError::Parse(format!("response body is not JSON: {e}")))?;

        let mut values = BTreeMap::new();
        for (extraction, path) in self.config.extract.iter().zip(&self.paths) {
            let Some(raw) = path.query(&json).first().and_then(|node| node.as_f64()) else {
                tracing::debug!(
                    name = %self.config.name,
                    path = %extraction.path,
                    "No numeric value at JSONPath"
                );
                continue;
            };

            if extraction.derive {
                self.next.record(&extraction.name, raw, now);
                if let Some(rate) = self.prior.rate(&extraction.name, raw, now) {
                    values.insert(extraction.name.clone(), rate);
                }
            } else {
                values.insert(extraction.name.clone(), raw);
            }
        }
        Ok(values)
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    async fn poll(&mut self) -> Result<(), ProbeError> {
        let mut request = match self.config.method {
            HttpMethod::Get => self.client.get(&self.config.url),
            HttpMethod::Post => self.client.post(&self.config.url),
            HttpMethod::Head => self.client.head(&self.config.url),
        }
        .timeout(self.config.timeout);

        for (key, value) in &self.config.headers {
            request = request.header(key.as_str(), expand_env_vars(value));
        }

        let start = Instant::now();
        let result = request.send().await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut observation = Observation {
            latency_ms,
            ..Observation::default()
        };

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                observation.status = Some(status);
                observation.available = status == self.config.expected_status;

                if observation.available {
                    tracing::debug!(name = %self.config.name, url = %self.config.url, latency_ms, status, "HTTP probe successful");
                } else {
                    tracing::warn!(
                        name = %self.config.name,
                        url = %self.config.url,
                        status,
                        expected = self.config.expected_status,
                        "HTTP probe got unexpected status"
                    );
                }

                if observation.available && !self.config.extract.is_empty() {
                    let body = response
                        .text()
                        .await
                        .map_err(|e| ProbeError::Http(e.to_string()))?;
                    observation.extracted = self.extract(&body, Utc::now())?;
                }
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    name = %self.config.name,
                    url = %self.config.url,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "HTTP probe timed out"
                );
            }
            Err(e) => {
                tracing::warn!(name = %self.config.name, url = %self.config.url, error = %e, "HTTP probe failed");
            }
        }

        self.observation = Some(observation);
        Ok(())
    }

    fn values(&self) -> Vec<Reading> {
        let Some(observation) = &self.observation else {
            return Vec::new();
        };

        let available = if observation.available { 1.0 } else { 0.0 };
        let mut reading = Reading::new(&self.config.name, HTTP_GUID)
            .with_metric(METRIC_AVAILABLE, MetricValue::gauge(available));

        if let Some(status) = observation.status {
            reading.insert(METRIC_LATENCY, MetricValue::gauge(observation.latency_ms));
            reading.insert(METRIC_STATUS, MetricValue::gauge(f64::from(status)));
        }

        for (name, value) in &observation.extracted {
            reading.insert(name, MetricValue::gauge(*value));
        }
        vec![reading]
    }

    fn counter_state(&self) -> CounterState {
        self.next.clone()
    }
}

/// Builds [`HttpProbe`]s, sharing one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpProbeFactory {
    client: Client,
}

impl HttpProbeFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ProbeFactory for HttpProbeFactory {
    fn create(&self, ctx: ProbeContext) -> Result<Box<dyn Probe>, ProbeError> {
        let config: HttpConfig = ctx.parse_config()?;
        Ok(Box::new(HttpProbe::new(config, self.client.clone(), ctx.prior)?))
    }
}

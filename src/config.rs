//! Configuration module for the agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Carbon endpoint settings (host, port, send timeout)
//! - Cycle timing (wake interval, probe timeout, batch size)
//! - Probe entries (one key per probe, single instance or list)

mod app;
mod validation;

pub use app::{
    AgentConfig, ApplicationConfig, ENGINE_KEYS, InstanceConfig, ProbeEntry, SAMPLE_CONFIG,
    instance_name,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_GRAPHITE_PORT, DEFAULT_GRAPHITE_TIMEOUT, DEFAULT_INSTANCE_NAME,
    DEFAULT_MAX_METRICS_PER_REQUEST, DEFAULT_METRIC_PREFIX, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_WAKE_INTERVAL, MIN_WAKE_INTERVAL,
};

//! Configuration validation utilities.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Errors loading the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("cannot read agent config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid YAML for the agent schema.
    #[error("invalid agent config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A setting is out of range.
    #[error("invalid setting: {0}")]
    Validation(String),
}

/// Parse duration string using humantime.
///
/// Supports various formats: `30s`, `1m`, `5m30s`, `1h`, `100ms`, etc.
/// A bare number is read as whole seconds, matching the legacy
/// `wake_interval: 60` form.
///
/// # Examples
///
/// ```
/// use graphite_agent::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("1m").unwrap().as_secs(), 60);
/// assert_eq!(parse_duration("90").unwrap().as_secs(), 90);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    if let Ok(secs) = s.parse::<f64>() {
        return seconds_to_duration(secs);
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn seconds_to_duration(secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds value {secs}: {e}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

/// Deserialize an optional duration given as seconds or a humantime string.
pub(crate) fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDuration>::deserialize(deserializer)?;
    raw.map(|raw| match raw {
        RawDuration::Seconds(secs) => seconds_to_duration(secs),
        RawDuration::Text(text) => parse_duration(&text),
    })
    .transpose()
    .map_err(serde::de::Error::custom)
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

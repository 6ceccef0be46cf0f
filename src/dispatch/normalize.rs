//! Metric path normalization.

use std::sync::OnceLock;

use regex::Regex;

/// Leading structural marker removed from metric names.
const COMPONENT_PREFIX: &str = "Component.";

/// Turn a probe metric name into dotted namespace segments.
///
/// `Component/Http/Latency[ms]` becomes `Http.Latency.ms`.
pub fn metric_name(raw: &str) -> String {
    let dotted: String = raw
        .chars()
        .filter(|c| *c != ']')
        .map(|c| if c == '[' || c == '/' { '.' } else { c })
        .collect();

    match dotted.strip_prefix(COMPONENT_PREFIX) {
        Some(rest) => rest.to_string(),
        None => dotted,
    }
}

/// Strip vendor prefixes such as `com.example.newrelic_` from a guid.
pub fn guid(raw: &str) -> String {
    static VENDOR_PREFIX: OnceLock<Regex> = OnceLock::new();

    if !raw.contains("newrelic") {
        return raw.to_string();
    }
    let regex = VENDOR_PREFIX
        .get_or_init(|| Regex::new(r"^com\.(.*)\.newrelic_").expect("failed to compile guid regex"));
    regex.replace(raw, "").into_owned()
}

/// Host segment: dots become underscores, unless an override is configured.
pub fn host_name(system: &str, override_name: Option<&str>) -> String {
    match override_name {
        Some(name) => name.to_string(),
        None => system.replace('.', "_"),
    }
}

/// Make a value safe to use as one dotted path segment.
pub fn path_segment(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("_")
}

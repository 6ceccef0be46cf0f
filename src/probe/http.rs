//! HTTP probes for checking endpoints and scraping JSON status pages.
//!
//! - [`HttpProbe`]: status, latency and JSONPath value extraction

mod probe;

pub use probe::{HTTP_GUID, HttpConfig, HttpMethod, HttpProbe, HttpProbeFactory, MetricExtraction};

//! Probe Layer
//!
//! Pluggable probes that fetch metrics from one external service each.
//! Every configured instance runs in its own Tokio task once per cycle and
//! publishes its readings on a shared result queue.
//!
//! # Architecture
//!
//! - [`Probe`]: Core trait for implementing probes
//! - [`ProbeFactory`]: Builds a probe from its instance config each cycle
//! - [`ProbeRegistry`]: Resolves configured names to factories
//! - [`ProbeRunner`]: Runs one instance with a timeout, isolating failures
//!
//! # Example
//!
//! ```rust,no_run
//! use graphite_agent::probe::{ProbeContext, ProbeRegistry};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ProbeRegistry::with_builtins();
//! let factory = registry.resolve("tcp")?;
//! let config = serde_json::json!({"name": "redis", "host": "127.0.0.1", "port": 6379});
//! let ctx = ProbeContext::new(config.as_object().cloned().unwrap_or_default(), Duration::from_secs(60));
//! let _probe = factory.create(ctx)?;
//! # Ok(())
//! # }
//! ```

pub mod http;
mod registry;
mod runner;
pub mod tcp;
mod traits;

pub use registry::{ProbeRegistry, QUALIFIER_SEPARATOR, ResolveError};
pub use runner::{InstanceId, ProbeReport, ProbeRunner};
pub use traits::{Probe, ProbeContext, ProbeError, ProbeFactory};

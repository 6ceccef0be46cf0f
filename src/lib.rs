//! graphite-agent - Periodic Metrics Collection Library
//!
//! This crate provides the cycle engine of a Graphite plugin agent. It can be
//! embedded by other Rust projects that bring their own probes, or run as a
//! standalone binary with the `graphite-agent` executable.
//!
//! # Architecture
//!
//! - **Probes**: Pluggable fetchers run concurrently once per cycle
//! - **Aggregation**: Cross-cycle min/max tracking and size-bounded batching
//! - **Dispatch**: Per-field sends to a metrics sink (Carbon plaintext)
//! - **Cycle**: The wake/dispatch/aggregate/flush/sleep loop
//!
//! # Example
//!
//! ```rust,no_run
//! use graphite_agent::{
//!     AgentConfig, AgentData, CycleController, Dispatcher, GraphiteSink, ProbeRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::load("/etc/graphite-agent.yaml")?;
//!     let app = &config.application;
//!
//!     let sink = GraphiteSink::from_config(app);
//!     let dispatcher = Dispatcher::new(sink, AgentData::current(), app.localhost_name.as_deref());
//!     let mut controller = CycleController::new(app, &ProbeRegistry::with_builtins(), dispatcher);
//!
//!     controller.run_cycle().await;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod cycle;
pub mod dispatch;
pub mod probe;
pub mod reading;

pub use aggregate::{Aggregator, Batch, MinMaxKey, MinMaxState};
pub use config::{AgentConfig, ApplicationConfig, ConfigError, InstanceConfig, ProbeEntry};
pub use cycle::{CycleController, CycleReport, CycleState, next_wake_interval};
pub use dispatch::{
    AgentData, DispatchSummary, Dispatcher, GraphiteSink, MetricField, MetricsSink, SendTags,
    SinkError,
};
pub use probe::{
    InstanceId, Probe, ProbeContext, ProbeError, ProbeFactory, ProbeRegistry, ProbeReport,
    ProbeRunner, ResolveError,
};
pub use reading::{CounterSample, CounterState, MetricValue, Reading};

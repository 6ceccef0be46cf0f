//! TCP probes for checking port reachability.
//!
//! - [`TcpProbe`]: TCP port connectivity and latency probe

mod probe;

pub use probe::{TCP_GUID, TcpConfig, TcpProbe, TcpProbeFactory};

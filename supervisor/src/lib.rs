//! Liveness monitoring of the managed node.
//!
//! The monitor is a reporting surface, not a failure path: repeated probe
//! failures only flip the readiness flag off, they never stop the pipeline.

mod metrics;
mod monitor;

pub use metrics::MonitorMetrics;
pub use monitor::{
    ChainInfo, DbSize, Monitor, MonitorConfig, NodeClient, NodeError, Readiness,
};

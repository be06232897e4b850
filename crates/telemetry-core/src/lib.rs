//! Core library behind the telemetry pipeline: `/proc` reading, the pid
//! forest, CPU/memory aggregation, system-wide sampling, the append-only
//! record journal, and replay/analysis. The collector daemon, client
//! agent and chart server binaries are thin wrappers around this crate.

pub mod aggregator;
pub mod analysis;
pub mod forest;
pub mod journal;
pub mod model;
pub mod procfs;
pub mod sysinfo;
pub mod time;

/// Short git SHA this crate was built from, embedded by `build.rs`.
/// `"unknown"` outside a git checkout.
pub const GIT_SHA: &str = env!("GIT_SHA");

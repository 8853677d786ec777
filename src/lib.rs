//! metapulse - distributed small-file and metadata benchmark
//!
//! metapulse measures the sustained throughput (files/sec, IOPS, MiB/sec)
//! and per-operation latency of a POSIX filesystem under small-file
//! workloads, replicated across many worker processes on many hosts.
//!
//! # Architecture
//!
//! - **Workload engine**: one synchronous process per worker, driving one
//!   of twenty operation types over a deterministic file population
//! - **File-based coordination**: starting gate, stonewall, and abort are
//!   sentinel files in a shared directory; no sockets, no locks
//! - **Stonewalled measurement**: statistics cover only the interval during
//!   which every worker was concurrently active
//! - **Latency histograms**: log-exponential buckets with delta dumps for
//!   percentiles-over-time

pub mod config;
pub mod coordinator;
pub mod output;
pub mod stats;
pub mod sync;
pub mod util;
pub mod workload;

// Re-export commonly used types
pub use config::{Operation, TestParams, WorkloadParams};
pub use workload::{Invocation, Status};

/// Result type used throughout metapulse
pub type Result<T> = anyhow::Result<T>;

//! # Master
//!
//! The driving side of the fleet: shard assignment, the per-iteration
//! kernel dispatch and quiescence barrier, checkpoint orchestration with a
//! durable manifest, and restore-on-startup. Also carries the PageRank
//! demo workload exercised by the integration tests and the demo binary.

pub mod manifest;
pub mod master;
pub mod pagerank;

pub use manifest::Manifest;
pub use master::{Master, RunDescriptor};

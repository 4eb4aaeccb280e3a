//! # Worker Runtime
//!
//! The serving side of the fleet: a dispatch loop over the message bus, a
//! kernel thread executing user methods shard by shard, a flusher thread
//! shipping buffered remote updates, and the durable per-shard checkpoint
//! files.

pub mod checkpoint;
pub mod flusher;
pub mod kernel;
pub mod metrics;
pub mod worker;

pub use checkpoint::{CheckpointReader, CheckpointWriter};
pub use flusher::Flusher;
pub use kernel::{KernelContext, KernelRegistry};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use worker::{spawn_worker, Worker};

//! # Sharded Table Engine
//!
//! The storage layer of the fleet: accumulator-merged open-addressed shard
//! stores, the global table that multiplexes local shards with buffered
//! remote writes and cached remote reads, and the registry that catalogs
//! table descriptors for workers and the master.

pub mod accumulator;
pub mod coder;
pub mod descriptor;
pub mod global_table;
pub mod registry;
pub mod shard_table;

pub use accumulator::{Accumulator, FnSharder, HashSharding, Max, Min, ModSharding, Replace, Sharder, Sum};
pub use coder::{RecordSink, RecordSource, SliceSource, VecSink};
pub use descriptor::{TableDescriptor, TableFingerprint};
pub use global_table::{GlobalTable, PendingBatch, Table};
pub use registry::TableRegistry;
pub use shard_table::ShardTable;

/// Bounds every table key type must satisfy.
///
/// Blanket-implemented; workloads never implement this by hand.
pub trait TableKey: Clone + Eq + std::hash::Hash + Send + Sync + 'static {}

impl<T: Clone + Eq + std::hash::Hash + Send + Sync + 'static> TableKey for T {}

/// Bounds every table value type must satisfy.
pub trait TableValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> TableValue for T {}

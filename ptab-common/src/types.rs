//! # Core Identifiers
//!
//! Rank, shard, and table identifiers shared by every crate in the
//! workspace. Ranks address endpoints on the message bus; shard ids index
//! partitions of a table; table ids name entries in the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bus endpoint index in `[0..ranks)`.
pub type Rank = usize;

/// Partition index in `[0..num_shards)` of a table.
pub type ShardId = usize;

/// The master always occupies rank 0; workers occupy `1..=num_workers`.
pub const MASTER_RANK: Rank = 0;

/// Process-wide identifier of a registered table.
///
/// Assigned by the workload at registration time and carried on the wire,
/// in checkpoints, and in the manifest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

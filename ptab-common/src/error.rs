//! # Error Types
//!
//! One error enum for the whole fleet. Lookup misses (`NotPresent`) are the
//! only variant callers are expected to handle; everything else indicates a
//! programming error, a schema drift, or a dead worker and is fatal to the
//! job.

use thiserror::Error;

use crate::marshal::MarshalError;
use crate::types::{Rank, ShardId, TableId};

/// Result alias used across the workspace.
pub type PtabResult<T> = Result<T, PtabError>;

/// Errors surfaced by tables, the bus, workers, and the master.
#[derive(Debug, Error)]
pub enum PtabError {
    /// A key lookup found no entry.
    #[error("no entry for key in table {table} shard {shard}")]
    NotPresent { table: TableId, shard: ShardId },

    /// `get_local` was issued for a shard this worker does not own.
    #[error("shard {shard} of table {table} is not owned by this worker")]
    NotLocal { table: TableId, shard: ShardId },

    /// Encode/decode failure at a serialization boundary.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// A send or placement referenced a rank outside the fleet.
    #[error("rank {rank} outside fleet of {ranks} ranks")]
    InvalidRank { rank: Rank, ranks: usize },

    /// A message or kernel referenced a table id that was never registered.
    #[error("unknown table id {0}")]
    UnknownTable(TableId),

    /// A routed operation ran before the master's shard assignment arrived.
    #[error("table {0} has no shard placement installed")]
    Unassigned(TableId),

    /// A kernel requested a table under different key/value types than it
    /// was registered with.
    #[error("table {0} is registered with different key/value types")]
    TableTypeMismatch(TableId),

    /// No kernel method registered under the requested names.
    #[error("no kernel method registered for {kernel}.{method}")]
    UnknownKernel { kernel: String, method: String },

    /// A failure raised by workload code inside a kernel method.
    #[error("{0}")]
    Workload(String),

    /// A kernel method returned an error; the call is aborted and reported.
    #[error("kernel {kernel}.{method} failed on shard {shard}: {message}")]
    KernelFailed {
        kernel: String,
        method: String,
        shard: ShardId,
        message: String,
    },

    /// A worker reported a failure in a completion message.
    #[error("worker {rank} reported failure: {message}")]
    WorkerFailed { rank: Rank, message: String },

    /// A checkpoint could not be restored in full.
    #[error("checkpoint at epoch {epoch} is unusable: {reason}")]
    CheckpointIncomplete { epoch: u64, reason: String },

    /// Startup options failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem failure while writing or reading durable state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

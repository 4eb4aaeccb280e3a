//! # Wire Protocol
//!
//! Message tags and payload structs exchanged between the master and the
//! workers. Payloads are serde structs encoded with bincode into `Bytes`;
//! the bus itself only sees opaque payloads addressed by (rank, tag).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PtabResult;
use crate::marshal::MarshalError;
use crate::params::ParamMap;
use crate::types::{Rank, ShardId, TableId};

/// Message channel identifiers, one per request/response kind.
///
/// Delivery is FIFO per (sender, receiver, tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    GetRequest,
    GetResponse,
    PutRequest,
    RunKernel,
    KernelDone,
    Assign,
    Flush,
    FlushDone,
    Checkpoint,
    CheckpointDone,
    Restore,
    RestoreDone,
    Reset,
    ResetDone,
    Shutdown,
}

impl Tag {
    /// Number of distinct tags, for per-tag counter arrays.
    pub const COUNT: usize = 15;

    /// Dense index of this tag in `[0..COUNT)`.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Remote lookup of one key; answered by the shard owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub table: TableId,
    pub key: Vec<u8>,
}

/// Reply to a `GetRequest`.
///
/// `value: None` with no error means the key is absent on the owner. A
/// populated `error` indicates a routing or schema violation and is fatal
/// to the requesting kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub value: Option<Vec<u8>>,
    pub error: Option<String>,
}

/// A batch of buffered updates shipped to the shard owner by the flusher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub table: TableId,
    pub shard: ShardId,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Whether the master persists tables at the end of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointPolicy {
    None,
    MasterControlled,
}

/// One kernel dispatch: run `kernel.method` once per listed shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunKernel {
    pub kernel: String,
    pub method: String,
    pub table: TableId,
    pub shards: Vec<ShardId>,
    pub params: ParamMap,
    pub checkpoint: CheckpointPolicy,
    pub checkpoint_tables: Vec<TableId>,
}

/// Completion report for one `RunKernel` dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelDone {
    pub rank: Rank,
    pub shards: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Shard-to-owner placement for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePlacement {
    pub table: TableId,
    pub owners: Vec<Rank>,
}

/// Startup broadcast installing the placement of every registered table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub tables: Vec<TablePlacement>,
}

/// Quiescence poll: drain inbound updates, flush outbound buffers, report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlushRequest;

/// Reply to a `FlushRequest` with the worker's traffic counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushDone {
    pub rank: Rank,
    /// Entries still buffered for remote shards after the flush.
    pub pending: usize,
    /// PUT_REQUEST messages this worker has sent so far.
    pub puts_sent: u64,
    /// PUT_REQUEST messages this worker has applied so far.
    pub puts_applied: u64,
}

/// Persist every owned shard of the listed tables under `epoch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub epoch: u64,
    pub tables: Vec<TableId>,
}

/// Acknowledgement of a completed (or failed) checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDone {
    pub rank: Rank,
    pub error: Option<String>,
}

/// Rebuild owned shards of the listed tables from the `epoch` checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub epoch: u64,
    pub tables: Vec<TableId>,
    pub params: ParamMap,
}

/// Acknowledgement of a completed (or failed) restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreDone {
    pub rank: Rank,
    pub error: Option<String>,
}

/// Clear every owned shard of the listed tables. Sent after a failed
/// restore so the whole fleet starts fresh, not just the worker that
/// could not load its shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    pub tables: Vec<TableId>,
}

/// Acknowledgement of a completed reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetDone {
    pub rank: Rank,
}

/// Orderly termination: drain buffers, stop threads, exit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Shutdown;

/// Encodes a payload struct into a bus-ready buffer.
pub fn encode_message<T: Serialize>(message: &T) -> PtabResult<Bytes> {
    let raw =
        bincode::serialize(message).map_err(|err| MarshalError::Malformed(err.to_string()))?;
    Ok(Bytes::from(raw))
}

/// Decodes a payload received from the bus.
pub fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> PtabResult<T> {
    bincode::deserialize(payload)
        .map_err(|err| MarshalError::Malformed(err.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let request = GetRequest {
            table: TableId(7),
            key: vec![1, 2, 3],
        };
        let payload = encode_message(&request).unwrap();
        let back: GetRequest = decode_message(&payload).unwrap();
        assert_eq!(back.table, TableId(7));
        assert_eq!(back.key, vec![1, 2, 3]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_message::<RunKernel>(&[0xff]).is_err());
    }

    #[test]
    fn tag_indexes_are_dense() {
        assert_eq!(Tag::GetRequest.index(), 0);
        assert_eq!(Tag::Shutdown.index(), Tag::COUNT - 1);
    }
}

//! # Global Table
//!
//! The distributed view of one registered table. Each worker's instance
//! holds every shard slot: owned shards are authoritative stores; for every
//! remote shard it keeps an *outbound buffer* (deltas awaiting the flusher)
//! and a *shadow store* (values fetched from the owner, serving repeat
//! reads within an iteration).
//!
//! Buffers and shadows are separate stores. Replays on the owner go
//! through the accumulator, so shipping a shadow-cached read as if it were
//! a delta would double-count it; keeping them apart also makes the
//! pending extraction exact: what the flusher takes is precisely the set
//! of updates issued since the previous extraction.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use ptab_common::bus::MessageBus;
use ptab_common::message::{self, GetRequest, GetResponse, Tag};
use ptab_common::{PtabError, PtabResult, Rank, ShardId, TableId};

use crate::coder::{RecordSink, RecordSource, SliceSource, VecSink};
use crate::descriptor::{TableDescriptor, TableFingerprint};
use crate::shard_table::ShardTable;
use crate::{TableKey, TableValue};

/// One extracted outbound buffer, serialized and addressed to the shard
/// owner, ready to become a PUT_REQUEST.
#[derive(Debug)]
pub struct PendingBatch {
    pub table: TableId,
    pub shard: ShardId,
    pub owner: Rank,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Byte-oriented table operations for the worker's untyped message loop.
///
/// Kernels recover the typed facade through `as_any`; the worker itself
/// only ever moves encoded keys and values.
pub trait Table: Send + Sync {
    fn table_id(&self) -> TableId;

    fn num_shards(&self) -> usize;

    fn fingerprint(&self) -> TableFingerprint;

    /// Installs the shard-to-rank placement and derives the ownership
    /// bitmap for `my_rank`. Broadcast by the master before iteration 0.
    fn assign(&self, owners: &[Rank], my_rank: Rank) -> PtabResult<()>;

    fn is_local_shard(&self, shard: ShardId) -> bool;

    fn owned_shards(&self) -> Vec<ShardId>;

    /// Owner-side lookup for a GET_REQUEST. `Ok(None)` means the key is
    /// absent; a non-owned shard is a routing violation.
    fn handle_get(&self, key: &[u8]) -> PtabResult<Option<Vec<u8>>>;

    /// Owner-side merge of an inbound PUT_REQUEST batch.
    fn apply_updates(&self, shard: ShardId, entries: &[(Vec<u8>, Vec<u8>)]) -> PtabResult<()>;

    /// Swaps out every non-empty outbound buffer and returns the batches.
    fn pending_updates(&self) -> PtabResult<Vec<PendingBatch>>;

    /// Entries still buffered for remote shards, for backpressure reports.
    fn pending_write_bytes(&self) -> usize;

    /// Drops cached remote reads; called at each kernel dispatch so reads
    /// after a barrier observe the previous iteration's updates.
    fn reset_shadows(&self);

    fn serialize_shard(&self, shard: ShardId, sink: &mut dyn RecordSink) -> PtabResult<()>;

    fn restore_shard(&self, shard: ShardId, source: &mut dyn RecordSource) -> PtabResult<()>;

    fn clear_shard(&self, shard: ShardId);

    /// Resizes every owned partition, e.g. before a bulk load.
    fn resize(&self, capacity: usize);

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Typed distributed table handle used by kernels.
pub struct GlobalTable<K, V> {
    descriptor: Arc<TableDescriptor<K, V>>,
    /// Authoritative store for owned shards, outbound buffer for the rest.
    partitions: Vec<Mutex<ShardTable<K, V>>>,
    /// Cache of remotely fetched values, one per shard (unused when owned).
    shadows: Vec<Mutex<ShardTable<K, V>>>,
    owned: Vec<AtomicBool>,
    placement: RwLock<Vec<Rank>>,
    bus: Arc<dyn MessageBus>,
}

impl<K: TableKey, V: TableValue> GlobalTable<K, V> {
    pub fn new(descriptor: Arc<TableDescriptor<K, V>>, bus: Arc<dyn MessageBus>) -> Arc<Self> {
        let partitions = (0..descriptor.num_shards)
            .map(|shard| {
                Mutex::new(ShardTable::new(
                    Arc::clone(&descriptor),
                    shard,
                    descriptor.initial_capacity,
                ))
            })
            .collect();
        let shadows = (0..descriptor.num_shards)
            .map(|shard| Mutex::new(ShardTable::new(Arc::clone(&descriptor), shard, 1)))
            .collect();
        let owned = (0..descriptor.num_shards)
            .map(|_| AtomicBool::new(false))
            .collect();
        Arc::new(GlobalTable {
            descriptor,
            partitions,
            shadows,
            owned,
            placement: RwLock::new(Vec::new()),
            bus,
        })
    }

    pub fn descriptor(&self) -> &Arc<TableDescriptor<K, V>> {
        &self.descriptor
    }

    pub fn shard_of(&self, key: &K) -> ShardId {
        self.descriptor.shard_of(key)
    }

    fn owner_of(&self, shard: ShardId) -> PtabResult<Rank> {
        self.placement
            .read()
            .get(shard)
            .copied()
            .ok_or(PtabError::Unassigned(self.descriptor.id))
    }

    /// Reads `key`, fetching from the owning worker when the shard is
    /// remote and no shadow copy exists yet. The fetched value seeds the
    /// shadow store, so repeat reads in the same iteration stay local.
    pub fn get(&self, key: &K) -> PtabResult<V> {
        let shard = self.shard_of(key);
        if self.is_local_shard(shard) {
            let partition = self.partitions[shard].lock();
            return partition
                .get(key)
                .cloned()
                .ok_or(PtabError::NotPresent {
                    table: self.descriptor.id,
                    shard,
                });
        }

        {
            let shadow = self.shadows[shard].lock();
            if let Some(value) = shadow.get(key) {
                return Ok(value.clone());
            }
        }
        self.fetch_remote(shard, key)
    }

    fn fetch_remote(&self, shard: ShardId, key: &K) -> PtabResult<V> {
        let owner = self.owner_of(shard)?;
        let mut key_raw = Vec::new();
        self.descriptor.key_marshal.encode(key, &mut key_raw)?;

        let request = GetRequest {
            table: self.descriptor.id,
            key: key_raw,
        };
        trace!(table = %self.descriptor.id, shard, owner, "fetching remote key");
        self.bus
            .send(owner, Tag::GetRequest, message::encode_message(&request)?)?;
        let payload = self.bus.recv_from(owner, Tag::GetResponse)?;
        let response: GetResponse = message::decode_message(&payload)?;

        if let Some(error) = response.error {
            return Err(PtabError::WorkerFailed {
                rank: owner,
                message: error,
            });
        }
        match response.value {
            Some(raw) => {
                let value = self.descriptor.value_marshal.decode(&raw)?;
                self.shadows[shard].lock().put(key.clone(), value.clone());
                Ok(value)
            }
            None => Err(PtabError::NotPresent {
                table: self.descriptor.id,
                shard,
            }),
        }
    }

    /// Like `get`, but fails `NotLocal` instead of issuing a fetch. For hot
    /// loops that must never stall on the network.
    pub fn get_local(&self, key: &K) -> PtabResult<V> {
        let shard = self.shard_of(key);
        if !self.is_local_shard(shard) {
            return Err(PtabError::NotLocal {
                table: self.descriptor.id,
                shard,
            });
        }
        self.partitions[shard]
            .lock()
            .get(key)
            .cloned()
            .ok_or(PtabError::NotPresent {
                table: self.descriptor.id,
                shard,
            })
    }

    /// Merges `value` into `key` through the accumulator: directly into the
    /// owned store, or into the shard's outbound buffer. Never blocks on
    /// the network.
    pub fn update(&self, key: K, value: V) {
        let shard = self.shard_of(&key);
        self.partitions[shard].lock().update(key, value);
    }

    /// Clears one local partition, the between-iterations reset used by
    /// ping-pong workloads.
    pub fn clear(&self, shard: ShardId) {
        self.partitions[shard].lock().clear();
    }
}

impl<K: TableKey, V: TableValue> Table for GlobalTable<K, V> {
    fn table_id(&self) -> TableId {
        self.descriptor.id
    }

    fn num_shards(&self) -> usize {
        self.descriptor.num_shards
    }

    fn fingerprint(&self) -> TableFingerprint {
        self.descriptor.fingerprint()
    }

    fn assign(&self, owners: &[Rank], my_rank: Rank) -> PtabResult<()> {
        if owners.len() != self.descriptor.num_shards {
            return Err(PtabError::Config(format!(
                "placement for table {} lists {} shards, expected {}",
                self.descriptor.id,
                owners.len(),
                self.descriptor.num_shards
            )));
        }
        for (shard, owner) in owners.iter().enumerate() {
            if *owner >= self.bus.ranks() {
                return Err(PtabError::InvalidRank {
                    rank: *owner,
                    ranks: self.bus.ranks(),
                });
            }
            self.owned[shard].store(*owner == my_rank, Ordering::Release);
        }
        *self.placement.write() = owners.to_vec();
        Ok(())
    }

    fn is_local_shard(&self, shard: ShardId) -> bool {
        self.owned
            .get(shard)
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn owned_shards(&self) -> Vec<ShardId> {
        (0..self.descriptor.num_shards)
            .filter(|&shard| self.is_local_shard(shard))
            .collect()
    }

    fn handle_get(&self, key_raw: &[u8]) -> PtabResult<Option<Vec<u8>>> {
        let key = self.descriptor.key_marshal.decode(key_raw)?;
        let shard = self.shard_of(&key);
        if !self.is_local_shard(shard) {
            return Err(PtabError::NotLocal {
                table: self.descriptor.id,
                shard,
            });
        }

        let partition = self.partitions[shard].lock();
        match partition.get(&key) {
            Some(value) => {
                let mut raw = Vec::new();
                self.descriptor.value_marshal.encode(value, &mut raw)?;
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    fn apply_updates(&self, shard: ShardId, entries: &[(Vec<u8>, Vec<u8>)]) -> PtabResult<()> {
        if !self.is_local_shard(shard) {
            return Err(PtabError::NotLocal {
                table: self.descriptor.id,
                shard,
            });
        }
        let mut partition = self.partitions[shard].lock();
        partition.apply_serialized(&mut SliceSource::new(entries))
    }

    fn pending_updates(&self) -> PtabResult<Vec<PendingBatch>> {
        let mut batches = Vec::new();
        for shard in 0..self.descriptor.num_shards {
            if self.is_local_shard(shard) {
                continue;
            }
            // Swap under the lock, serialize outside it: the kernel thread
            // resumes writing into the fresh buffer while the old one is
            // encoded without further synchronization.
            let taken = {
                let mut partition = self.partitions[shard].lock();
                if partition.is_empty() {
                    continue;
                }
                let fresh = ShardTable::new(Arc::clone(&self.descriptor), shard, 1);
                std::mem::replace(&mut *partition, fresh)
            };

            let owner = self.owner_of(shard)?;
            let mut sink = VecSink::new();
            taken.serialize(&mut sink)?;
            batches.push(PendingBatch {
                table: self.descriptor.id,
                shard,
                owner,
                entries: sink.into_records(),
            });
        }
        Ok(batches)
    }

    fn pending_write_bytes(&self) -> usize {
        (0..self.descriptor.num_shards)
            .filter(|&shard| !self.is_local_shard(shard))
            .map(|shard| self.partitions[shard].lock().len())
            .sum()
    }

    fn reset_shadows(&self) {
        for shard in 0..self.descriptor.num_shards {
            if !self.is_local_shard(shard) {
                self.shadows[shard].lock().clear();
            }
        }
    }

    fn serialize_shard(&self, shard: ShardId, sink: &mut dyn RecordSink) -> PtabResult<()> {
        self.partitions[shard].lock().serialize(sink)
    }

    fn restore_shard(&self, shard: ShardId, source: &mut dyn RecordSource) -> PtabResult<()> {
        self.partitions[shard].lock().apply_serialized(source)
    }

    fn clear_shard(&self, shard: ShardId) {
        self.partitions[shard].lock().clear();
    }

    fn resize(&self, capacity: usize) {
        for shard in 0..self.descriptor.num_shards {
            if self.is_local_shard(shard) {
                self.partitions[shard].lock().resize(capacity);
            }
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

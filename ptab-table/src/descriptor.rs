//! # Table Descriptors
//!
//! The immutable per-table catalog entry: identity, shard count, marshals,
//! sharding function, and accumulator. Created at registration and never
//! mutated afterwards; shared by `Arc` between the global table, every
//! shard store, and the registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ptab_common::{Marshal, ShardId, TableId};

use crate::accumulator::{Accumulator, Sharder};

/// Everything the framework needs to know about one table.
pub struct TableDescriptor<K, V> {
    pub id: TableId,
    pub num_shards: usize,
    /// Bucket count each shard store starts with; stores grow on demand.
    pub initial_capacity: usize,
    pub key_marshal: Arc<dyn Marshal<K>>,
    pub value_marshal: Arc<dyn Marshal<V>>,
    pub sharder: Arc<dyn Sharder<K>>,
    pub accumulator: Arc<dyn Accumulator<V>>,
}

impl<K, V> TableDescriptor<K, V> {
    pub fn new(
        id: TableId,
        num_shards: usize,
        key_marshal: impl Marshal<K> + 'static,
        value_marshal: impl Marshal<V> + 'static,
        sharder: impl Sharder<K> + 'static,
        accumulator: impl Accumulator<V> + 'static,
    ) -> Self {
        TableDescriptor {
            id,
            num_shards,
            initial_capacity: 1,
            key_marshal: Arc::new(key_marshal),
            value_marshal: Arc::new(value_marshal),
            sharder: Arc::new(sharder),
            accumulator: Arc::new(accumulator),
        }
    }

    /// Overrides the starting bucket count of each shard store.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity.max(1);
        self
    }

    /// The shard owning `key`.
    pub fn shard_of(&self, key: &K) -> ShardId {
        self.sharder.shard_of(key, self.num_shards)
    }

    /// Schema identity recorded in checkpoint headers.
    pub fn fingerprint(&self) -> TableFingerprint {
        TableFingerprint {
            table: self.id,
            key_type: self.key_marshal.type_tag().to_owned(),
            value_type: self.value_marshal.type_tag().to_owned(),
        }
    }
}

impl<K, V> Clone for TableDescriptor<K, V> {
    fn clone(&self) -> Self {
        TableDescriptor {
            id: self.id,
            num_shards: self.num_shards,
            initial_capacity: self.initial_capacity,
            key_marshal: Arc::clone(&self.key_marshal),
            value_marshal: Arc::clone(&self.value_marshal),
            sharder: Arc::clone(&self.sharder),
            accumulator: Arc::clone(&self.accumulator),
        }
    }
}

/// Identity of a table's on-disk schema: id plus key/value type tags.
///
/// A restore rejects shard files whose fingerprint differs from the live
/// registration, which catches schema drift across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFingerprint {
    pub table: TableId,
    pub key_type: String,
    pub value_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{ModSharding, Sum};
    use ptab_common::FixedMarshal;

    #[test]
    fn shard_of_uses_sharder() {
        let descriptor = TableDescriptor::<u32, i64>::new(
            TableId(1),
            4,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            Sum,
        );
        assert_eq!(descriptor.shard_of(&9), 1);
    }

    #[test]
    fn fingerprint_names_types() {
        let descriptor = TableDescriptor::<u32, f64>::new(
            TableId(3),
            2,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            Sum,
        );
        let fingerprint = descriptor.fingerprint();
        assert_eq!(fingerprint.table, TableId(3));
        assert_eq!(fingerprint.key_type, "u32");
        assert_eq!(fingerprint.value_type, "f64");
    }

    #[test]
    fn initial_capacity_is_clamped() {
        let descriptor = TableDescriptor::<u32, i64>::new(
            TableId(1),
            4,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            Sum,
        )
        .with_initial_capacity(0);
        assert_eq!(descriptor.initial_capacity, 1);
    }
}

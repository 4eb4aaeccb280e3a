//! # Shard Store
//!
//! The single-shard open-addressed hash store. One instance backs each
//! owned partition of a global table; the same structure doubles as the
//! write coalescer for remote shards, because the only difference between
//! the two roles is which merge seeds an empty slot, and `update` handles
//! both (store on first touch, accumulate on collision).

use std::hash::BuildHasher;
use std::sync::Arc;

use ahash::RandomState;

use ptab_common::{PtabResult, ShardId};

use crate::coder::{RecordSink, RecordSource};
use crate::descriptor::TableDescriptor;
use crate::{TableKey, TableValue};

/// Occupancy bound; growth keeps `entries <= LOAD_FACTOR * capacity`, which
/// also guarantees probes always find a vacant bucket.
const LOAD_FACTOR: f64 = 0.8;

struct Bucket<K, V> {
    key: K,
    value: V,
}

/// Open-addressed hash store with linear probing.
///
/// Keys are created and updated, never removed; `clear` vacates every
/// bucket without releasing the allocation, so stores cleared between
/// iterations keep their capacity.
pub struct ShardTable<K, V> {
    descriptor: Arc<TableDescriptor<K, V>>,
    shard: ShardId,
    buckets: Vec<Option<Bucket<K, V>>>,
    entries: usize,
    hash: RandomState,
}

impl<K: TableKey, V: TableValue> ShardTable<K, V> {
    /// Creates a store for `shard` with at least one bucket.
    pub fn new(descriptor: Arc<TableDescriptor<K, V>>, shard: ShardId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ShardTable {
            descriptor,
            shard,
            buckets: (0..capacity).map(|_| None).collect(),
            entries: 0,
            hash: RandomState::new(),
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_idx(&self, key: &K) -> usize {
        (self.hash.hash_one(key) as usize) % self.buckets.len()
    }

    /// Probes from the key's home bucket; `None` means the key is absent.
    fn bucket_for_key(&self, key: &K) -> Option<usize> {
        let start = self.bucket_idx(key);
        let mut idx = start;
        loop {
            match &self.buckets[idx] {
                Some(bucket) if bucket.key == *key => return Some(idx),
                Some(_) => {}
                None => return None,
            }
            idx = (idx + 1) % self.buckets.len();
            if idx == start {
                return None;
            }
        }
    }

    /// First vacant bucket on the key's probe path. Callers grow the table
    /// first, so a vacancy always exists.
    fn free_slot(&self, key: &K) -> usize {
        let mut idx = self.bucket_idx(key);
        loop {
            if self.buckets[idx].is_none() {
                return idx;
            }
            idx = (idx + 1) % self.buckets.len();
        }
    }

    /// Grows before an insert would push occupancy past the load factor.
    /// The check runs before probing for a slot, so even a full single
    /// bucket table grows instead of wrapping forever.
    fn reserve_one(&mut self) {
        if (self.entries + 1) as f64 > LOAD_FACTOR * self.buckets.len() as f64 {
            let grown = self.buckets.len() * 2 + 1;
            self.rehash(grown);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.bucket_for_key(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.bucket_for_key(key)
            .and_then(|idx| self.buckets[idx].as_ref())
            .map(|bucket| &bucket.value)
    }

    /// Inserts `key`, overwriting any existing value.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(idx) = self.bucket_for_key(&key) {
            if let Some(bucket) = self.buckets[idx].as_mut() {
                bucket.value = value;
            }
            return;
        }
        self.reserve_one();
        let idx = self.free_slot(&key);
        self.buckets[idx] = Some(Bucket { key, value });
        self.entries += 1;
    }

    /// Merges `value` into `key` through the descriptor's accumulator, or
    /// stores it unchanged when the key is new.
    pub fn update(&mut self, key: K, value: V) {
        if let Some(idx) = self.bucket_for_key(&key) {
            if let Some(bucket) = self.buckets[idx].as_mut() {
                self.descriptor
                    .accumulator
                    .accumulate(&mut bucket.value, value);
            }
            return;
        }
        self.put(key, value);
    }

    /// Vacates every bucket; capacity is retained.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = None;
        }
        self.entries = 0;
    }

    /// Copy-rehashes into `capacity` buckets (at least one), reinserting
    /// every entry. Shrinking below the load bound simply grows back.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.buckets.len() {
            return;
        }
        self.rehash(capacity);
    }

    fn rehash(&mut self, capacity: usize) {
        let old = std::mem::replace(
            &mut self.buckets,
            (0..capacity).map(|_| None).collect(),
        );
        let old_entries = self.entries;
        self.entries = 0;
        for bucket in old.into_iter().flatten() {
            self.put(bucket.key, bucket.value);
        }
        debug_assert_eq!(old_entries, self.entries);
    }

    /// Borrowing iterator over occupied buckets in arbitrary order.
    /// Invalidated by any mutation, as the borrow checker enforces.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.buckets
            .iter()
            .flatten()
            .map(|bucket| (&bucket.key, &bucket.value))
    }

    /// Writes every entry as an encoded record pair.
    pub fn serialize(&self, sink: &mut dyn RecordSink) -> PtabResult<()> {
        let mut key_buf = Vec::new();
        let mut value_buf = Vec::new();
        for (key, value) in self.iter() {
            key_buf.clear();
            value_buf.clear();
            self.descriptor.key_marshal.encode(key, &mut key_buf)?;
            self.descriptor.value_marshal.encode(value, &mut value_buf)?;
            sink.write(&key_buf, &value_buf)?;
        }
        Ok(())
    }

    /// Decodes records and merges each through `update`, never `put`, so
    /// replays on the owner compose under the accumulator.
    pub fn apply_serialized(&mut self, source: &mut dyn RecordSource) -> PtabResult<()> {
        while let Some((key_raw, value_raw)) = source.read()? {
            let key = self.descriptor.key_marshal.decode(&key_raw)?;
            let value = self.descriptor.value_marshal.decode(&value_raw)?;
            self.update(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{FnSharder, ModSharding, Replace, Sum};
    use crate::coder::{SliceSource, VecSink};
    use ptab_common::{BincodeMarshal, FixedMarshal, StringMarshal, TableId};

    fn int_table(accumulator: impl crate::Accumulator<i64> + 'static) -> ShardTable<u32, i64> {
        let descriptor = Arc::new(TableDescriptor::new(
            TableId(1),
            1,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            accumulator,
        ));
        ShardTable::new(descriptor, 0, 4)
    }

    /// Key whose hash is constant, forcing every insert onto one probe
    /// chain regardless of the store's random hash seed.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct Collider(u32);

    impl std::hash::Hash for Collider {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            state.write_u64(0);
        }
    }

    fn collider_shard(_: &Collider, _: usize) -> ShardId {
        0
    }

    #[test]
    fn colliding_keys_probe_linearly() {
        let descriptor = Arc::new(TableDescriptor::new(
            TableId(1),
            1,
            BincodeMarshal::new(),
            FixedMarshal,
            FnSharder(collider_shard),
            Sum,
        ));
        let mut table: ShardTable<Collider, i64> = ShardTable::new(descriptor, 0, 4);

        table.put(Collider(0), 1);
        table.put(Collider(4), 2);
        table.put(Collider(8), 3);

        assert_eq!(table.get(&Collider(0)), Some(&1));
        assert_eq!(table.get(&Collider(4)), Some(&2));
        assert_eq!(table.get(&Collider(8)), Some(&3));
        assert!(table.contains(&Collider(4)));
        assert!(!table.contains(&Collider(16)));
        assert_eq!(table.len(), 3);
        assert_eq!(table.capacity(), 4);

        // The fourth insert pushes occupancy past 0.8 and triggers growth.
        table.put(Collider(12), 4);
        assert_eq!(table.capacity(), 9);
        assert_eq!(table.len(), 4);
        for (key, expected) in [(0, 1), (4, 2), (8, 3), (12, 4)] {
            assert_eq!(table.get(&Collider(key)), Some(&expected));
        }
    }

    #[test]
    fn update_folds_through_accumulator() {
        let descriptor = Arc::new(TableDescriptor::new(
            TableId(2),
            1,
            StringMarshal,
            FixedMarshal,
            crate::accumulator::HashSharding::new(),
            Sum,
        ));
        let mut table: ShardTable<String, i64> = ShardTable::new(descriptor, 0, 8);

        table.update("a".to_string(), 3);
        table.update("a".to_string(), 4);
        table.update("a".to_string(), -1);
        assert_eq!(table.get(&"a".to_string()), Some(&6));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn put_overwrites_existing() {
        let mut table = int_table(Sum);
        table.put(9, 10);
        table.put(9, 20);
        assert_eq!(table.get(&9), Some(&20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn single_bucket_table_grows_before_probing() {
        let descriptor = Arc::new(TableDescriptor::new(
            TableId(1),
            1,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            Sum,
        ));
        let mut table: ShardTable<u32, i64> = ShardTable::new(descriptor, 0, 1);

        table.put(1, 1);
        assert_eq!(table.capacity(), 3);
        table.put(2, 2);
        assert_eq!(table.get(&1), Some(&1));
        assert_eq!(table.get(&2), Some(&2));
    }

    #[test]
    fn occupancy_stays_under_load_factor() {
        let mut table = int_table(Sum);
        for key in 0..1000u32 {
            table.put(key, key as i64);
            assert!(
                table.len() as f64 <= LOAD_FACTOR * table.capacity() as f64,
                "load bound violated at {} entries / {} buckets",
                table.len(),
                table.capacity()
            );
        }
        assert_eq!(table.len(), 1000);
    }

    #[test]
    fn clear_retains_capacity() {
        let mut table = int_table(Sum);
        for key in 0..100u32 {
            table.put(key, 1);
        }
        let capacity = table.capacity();
        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), capacity);
        assert!(table.get(&5).is_none());
    }

    #[test]
    fn resize_preserves_entries() {
        let mut table = int_table(Sum);
        for key in 0..50u32 {
            table.put(key, key as i64 * 3);
        }

        let mut before: Vec<(u32, i64)> = table.iter().map(|(k, v)| (*k, *v)).collect();
        before.sort_unstable();

        table.resize(256);
        assert_eq!(table.capacity(), 256);

        let mut after: Vec<(u32, i64)> = table.iter().map(|(k, v)| (*k, *v)).collect();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn serialize_roundtrip_with_replace() {
        let mut table = int_table(Replace);
        for key in 0..20u32 {
            table.put(key, key as i64);
        }

        let mut sink = VecSink::new();
        table.serialize(&mut sink).unwrap();
        let records = sink.into_records();
        assert_eq!(records.len(), 20);

        let mut rebuilt = int_table(Replace);
        rebuilt
            .apply_serialized(&mut SliceSource::new(&records))
            .unwrap();
        assert_eq!(rebuilt.len(), 20);
        for key in 0..20u32 {
            assert_eq!(rebuilt.get(&key), table.get(&key));
        }
    }

    #[test]
    fn apply_serialized_folds_into_seeded_table() {
        let mut source_table = int_table(Sum);
        source_table.put(1, 10);
        source_table.put(2, 20);

        let mut sink = VecSink::new();
        source_table.serialize(&mut sink).unwrap();
        let records = sink.into_records();

        let mut target = int_table(Sum);
        target.update(1, 5);
        target
            .apply_serialized(&mut SliceSource::new(&records))
            .unwrap();

        assert_eq!(target.get(&1), Some(&15));
        assert_eq!(target.get(&2), Some(&20));
    }

    #[test]
    fn iterator_visits_every_entry_once() {
        let mut table = int_table(Sum);
        for key in 0..30u32 {
            table.put(key, 1);
        }
        let mut seen: Vec<u32> = table.iter().map(|(k, _)| *k).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
    }
}

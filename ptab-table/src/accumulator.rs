//! # Accumulators and Sharding Functions
//!
//! An accumulator merges two values for the same key; a sharder maps a key
//! to its owning partition. Both are held as trait objects in the table
//! descriptor so the byte-oriented message loop and the typed kernel API
//! share one definition.

use std::hash::BuildHasher;
use std::ops::AddAssign;

use ptab_common::ShardId;

/// Binary merge operation applied to concurrent updates of one key.
///
/// The buffering scheme requires the operation to be commutative and
/// associative: deltas for a key are folded locally in arbitrary order and
/// again on the owner when batches arrive. The first update of a key in an
/// empty slot stores the incoming value unchanged.
pub trait Accumulator<V>: Send + Sync {
    fn accumulate(&self, current: &mut V, incoming: V);
}

/// Adds the incoming value to the current one.
pub struct Sum;

impl<V: AddAssign + Send + Sync> Accumulator<V> for Sum {
    fn accumulate(&self, current: &mut V, incoming: V) {
        *current += incoming;
    }
}

/// Keeps the smaller of the two values.
pub struct Min;

impl<V: PartialOrd + Send + Sync> Accumulator<V> for Min {
    fn accumulate(&self, current: &mut V, incoming: V) {
        if incoming < *current {
            *current = incoming;
        }
    }
}

/// Keeps the larger of the two values.
pub struct Max;

impl<V: PartialOrd + Send + Sync> Accumulator<V> for Max {
    fn accumulate(&self, current: &mut V, incoming: V) {
        if incoming > *current {
            *current = incoming;
        }
    }
}

/// Keeps the most recent value.
pub struct Replace;

impl<V: Send + Sync> Accumulator<V> for Replace {
    fn accumulate(&self, current: &mut V, incoming: V) {
        *current = incoming;
    }
}

/// Maps a key to a shard in `[0..num_shards)`.
///
/// Every rank must compute the same shard for the same key, so sharders
/// must be deterministic across processes.
pub trait Sharder<K>: Send + Sync {
    fn shard_of(&self, key: &K, num_shards: usize) -> ShardId;
}

/// Shards integer keys by remainder.
pub struct ModSharding;

macro_rules! mod_sharding {
    ($($ty:ty),* $(,)?) => {$(
        impl Sharder<$ty> for ModSharding {
            fn shard_of(&self, key: &$ty, num_shards: usize) -> ShardId {
                (*key as i128).rem_euclid(num_shards as i128) as ShardId
            }
        }
    )*};
}

mod_sharding!(u32, u64, i32, i64);

/// Shards arbitrary hashable keys with a fixed-seed hash, so placement is
/// identical on every rank and across restarts.
pub struct HashSharding {
    state: ahash::RandomState,
}

impl HashSharding {
    pub fn new() -> Self {
        HashSharding {
            state: ahash::RandomState::with_seeds(
                0x9e37_79b9_7f4a_7c15,
                0x6a09_e667_f3bc_c909,
                0xbb67_ae85_84ca_a73b,
                0x3c6e_f372_fe94_f82b,
            ),
        }
    }
}

impl Default for HashSharding {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: std::hash::Hash + Send + Sync> Sharder<K> for HashSharding {
    fn shard_of(&self, key: &K, num_shards: usize) -> ShardId {
        (self.state.hash_one(key) as usize) % num_shards
    }
}

/// Wraps a plain function pointer as a sharder, for workload-supplied
/// partitioning such as grouping web pages by site.
pub struct FnSharder<K>(pub fn(&K, usize) -> ShardId);

impl<K> Sharder<K> for FnSharder<K> {
    fn shard_of(&self, key: &K, num_shards: usize) -> ShardId {
        (self.0)(key, num_shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_folds() {
        let mut value = 3i64;
        Sum.accumulate(&mut value, 4);
        Sum.accumulate(&mut value, -1);
        assert_eq!(value, 6);
    }

    #[test]
    fn min_max_keep_extremes() {
        let mut low = 5i32;
        Min.accumulate(&mut low, 9);
        Min.accumulate(&mut low, 2);
        assert_eq!(low, 2);

        let mut high = 5i32;
        Max.accumulate(&mut high, 9);
        Max.accumulate(&mut high, 2);
        assert_eq!(high, 9);
    }

    #[test]
    fn replace_takes_incoming() {
        let mut value = "old".to_string();
        Replace.accumulate(&mut value, "new".to_string());
        assert_eq!(value, "new");
    }

    #[test]
    fn mod_sharding_handles_negatives() {
        assert_eq!(ModSharding.shard_of(&7u32, 4), 3);
        assert_eq!(ModSharding.shard_of(&-3i32, 4), 1);
    }

    #[test]
    fn hash_sharding_is_stable() {
        let a = HashSharding::new();
        let b = HashSharding::new();
        for key in ["alpha", "beta", "gamma"] {
            assert_eq!(a.shard_of(&key, 8), b.shard_of(&key, 8));
        }
    }

    #[test]
    fn fn_sharder_delegates() {
        fn by_tens(key: &u32, shards: usize) -> ShardId {
            (*key as usize / 10) % shards
        }
        let sharder = FnSharder(by_tens);
        assert_eq!(sharder.shard_of(&42, 3), 1);
    }
}

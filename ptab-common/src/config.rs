//! # Fleet Configuration
//!
//! Startup options for the master and workers, all consumed before the
//! first iteration. Plain struct with defaults; workloads override fields
//! directly.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PtabError, PtabResult};
use crate::types::Rank;

/// Options shared by the master and every worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of the worker fleet.
    pub num_workers: usize,
    /// Number of shards per table; must be at least `num_workers`.
    pub shards: usize,
    /// Number of iterations the master runs.
    pub iterations: usize,
    /// Enable master-controlled checkpointing.
    pub checkpoint: bool,
    /// Durable-storage root for shard files and the manifest.
    pub checkpoint_dir: PathBuf,
    /// Scheduling granularity: shards per worker per kernel dispatch.
    pub slots: usize,
    /// How often the flusher wakes to drain outbound buffers.
    pub flush_interval: Duration,
    /// Buffered-entry count above which the flusher stops waiting the full
    /// interval between drains.
    pub flush_high_water: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_workers: 2,
            shards: 4,
            iterations: 10,
            checkpoint: false,
            checkpoint_dir: PathBuf::from("ptab-checkpoints"),
            slots: 256,
            flush_interval: Duration::from_millis(5),
            flush_high_water: 64 * 1024,
        }
    }
}

impl Config {
    /// Validates startup options; called by master and worker constructors.
    pub fn validate(&self) -> PtabResult<()> {
        if self.num_workers == 0 {
            return Err(PtabError::Config("num_workers must be at least 1".into()));
        }
        if self.shards < self.num_workers {
            return Err(PtabError::Config(format!(
                "shards ({}) must be at least num_workers ({})",
                self.shards, self.num_workers
            )));
        }
        if self.slots == 0 {
            return Err(PtabError::Config("slots must be at least 1".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(PtabError::Config("flush_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Total bus endpoints: one master plus the workers.
    pub fn ranks(&self) -> usize {
        self.num_workers + 1
    }

    /// Bus ranks occupied by workers.
    pub fn worker_ranks(&self) -> impl Iterator<Item = Rank> {
        1..=self.num_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_fewer_shards_than_workers() {
        let config = Config {
            num_workers: 4,
            shards: 2,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ranks_include_master() {
        let config = Config {
            num_workers: 3,
            shards: 3,
            ..Config::default()
        };
        assert_eq!(config.ranks(), 4);
        assert_eq!(config.worker_ranks().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}

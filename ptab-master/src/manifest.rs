//! # Checkpoint Manifest
//!
//! The master's durable record of the latest consistent checkpoint: the
//! epoch, the table ids persisted at that epoch, and the parameter map to
//! hand back to the resuming driver. Rewritten atomically (temp file,
//! fsync, rename) only after every worker has acknowledged its shard
//! files, so a manifest always points at a complete checkpoint.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ptab_common::{ParamMap, PtabResult, TableId};

const MANIFEST_FILE: &str = "manifest.json";

/// Durable restart point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub epoch: u64,
    pub tables: Vec<TableId>,
    pub params: ParamMap,
}

impl Manifest {
    /// Atomically replaces the manifest under `root`.
    pub fn store(&self, root: &Path) -> PtabResult<()> {
        fs::create_dir_all(root)?;
        let final_path = root.join(MANIFEST_FILE);
        let temp_path = final_path.with_extension("tmp");

        let raw = serde_json::to_vec_pretty(self)
            .map_err(|err| ptab_common::MarshalError::Malformed(err.to_string()))?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&raw)?;
        file.sync_all()?;
        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    /// Loads the manifest, `None` when no usable one exists. An unreadable
    /// manifest counts as absent: the system starts fresh.
    pub fn load(root: &Path) -> PtabResult<Option<Manifest>> {
        let path = root.join(MANIFEST_FILE);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&raw) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable manifest");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(epoch: u64) -> Manifest {
        let mut params = ParamMap::new();
        params.set_int("iteration", epoch as i64);
        Manifest {
            epoch,
            tables: vec![TableId(0), TableId(1)],
            params,
        }
    }

    #[test]
    fn store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        manifest(4).store(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest(4));
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), None);
    }

    #[test]
    fn rewrite_replaces_previous_epoch() {
        let dir = tempfile::tempdir().unwrap();
        manifest(1).store(dir.path()).unwrap();
        manifest(2).store(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.epoch, 2);
    }

    #[test]
    fn corrupt_manifest_reads_as_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), None);
    }
}

//! # Shard Checkpoint Files
//!
//! One durable file per (table, shard, epoch):
//!
//! ```text
//! +-----------------+------------------------------+----------+--------+
//! | header_len: u32 | header (bincode)             | records  | footer |
//! +-----------------+------------------------------+----------+--------+
//!
//! header: magic, format version, descriptor fingerprint, shard id
//! record: key_len u32 | key | value_len u32 | value
//! footer: sentinel u32::MAX | crc32 of the record section
//! ```
//!
//! Files are written to a temp path, fsynced, and renamed into place, so a
//! crash mid-checkpoint leaves no partially visible shard file. The reader
//! validates the fingerprint before yielding records and the CRC after the
//! last one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ptab_common::{PtabError, PtabResult, ShardId, TableId};
use ptab_table::{RecordSink, RecordSource, TableFingerprint};

const MAGIC: &[u8; 8] = b"PTABSHD1";
const FORMAT_VERSION: u32 = 1;
const SENTINEL: u32 = u32::MAX;

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 8],
    version: u32,
    fingerprint: TableFingerprint,
    shard: u64,
}

/// Directory holding every shard file of one checkpoint epoch.
pub fn epoch_dir(root: &Path, epoch: u64) -> PathBuf {
    root.join(format!("epoch_{epoch:06}"))
}

/// Path of the shard file for `(table, shard)` at `epoch`.
pub fn shard_file_path(root: &Path, epoch: u64, table: TableId, shard: ShardId) -> PathBuf {
    epoch_dir(root, epoch).join(format!("table_{table}_shard_{shard}.tab"))
}

/// Streams one shard's records into a durable file.
pub struct CheckpointWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
}

impl CheckpointWriter {
    /// Creates the epoch directory and opens the temp file with the header
    /// already written.
    pub fn create(
        root: &Path,
        epoch: u64,
        fingerprint: &TableFingerprint,
        shard: ShardId,
    ) -> PtabResult<Self> {
        fs::create_dir_all(epoch_dir(root, epoch))?;
        let final_path = shard_file_path(root, epoch, fingerprint.table, shard);
        let temp_path = final_path.with_extension("tmp");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        let header = FileHeader {
            magic: *MAGIC,
            version: FORMAT_VERSION,
            fingerprint: fingerprint.clone(),
            shard: shard as u64,
        };
        let header_raw = bincode::serialize(&header)
            .map_err(|err| ptab_common::MarshalError::Malformed(err.to_string()))?;
        writer.write_all(&(header_raw.len() as u32).to_le_bytes())?;
        writer.write_all(&header_raw)?;

        Ok(CheckpointWriter {
            temp_path,
            final_path,
            writer,
            hasher: crc32fast::Hasher::new(),
        })
    }

    fn write_section(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.hasher.update(data);
        self.writer.write_all(data)
    }

    /// Writes the footer, syncs, and atomically publishes the file.
    pub fn finish(mut self) -> PtabResult<()> {
        self.writer.write_all(&SENTINEL.to_le_bytes())?;
        let crc = self.hasher.finalize();
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.temp_path, &self.final_path)?;
        Ok(())
    }
}

impl RecordSink for CheckpointWriter {
    fn write(&mut self, key: &[u8], value: &[u8]) -> PtabResult<()> {
        self.write_section(&(key.len() as u32).to_le_bytes())?;
        self.write_section(key)?;
        self.write_section(&(value.len() as u32).to_le_bytes())?;
        self.write_section(value)?;
        Ok(())
    }
}

/// Streams one shard's records back out of a checkpoint file.
pub struct CheckpointReader {
    epoch: u64,
    reader: BufReader<File>,
    hasher: crc32fast::Hasher,
    done: bool,
}

impl CheckpointReader {
    /// Opens a shard file and validates magic, version, and fingerprint.
    pub fn open(
        root: &Path,
        epoch: u64,
        fingerprint: &TableFingerprint,
        shard: ShardId,
    ) -> PtabResult<Self> {
        let path = shard_file_path(root, epoch, fingerprint.table, shard);
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let mut len_raw = [0u8; 4];
        reader.read_exact(&mut len_raw)?;
        let mut header_raw = vec![0u8; u32::from_le_bytes(len_raw) as usize];
        reader.read_exact(&mut header_raw)?;
        let header: FileHeader = bincode::deserialize(&header_raw)
            .map_err(|err| ptab_common::MarshalError::Malformed(err.to_string()))?;

        if header.magic != *MAGIC || header.version != FORMAT_VERSION {
            return Err(PtabError::CheckpointIncomplete {
                epoch,
                reason: format!("unrecognized shard file format in {}", path.display()),
            });
        }
        if header.fingerprint != *fingerprint || header.shard != shard as u64 {
            return Err(PtabError::CheckpointIncomplete {
                epoch,
                reason: format!(
                    "shard file {} was written for table {} ({} -> {}), shard {}",
                    path.display(),
                    header.fingerprint.table,
                    header.fingerprint.key_type,
                    header.fingerprint.value_type,
                    header.shard
                ),
            });
        }

        Ok(CheckpointReader {
            epoch,
            reader,
            hasher: crc32fast::Hasher::new(),
            done: false,
        })
    }

    fn read_section(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.reader.read_exact(buf)?;
        self.hasher.update(buf);
        Ok(())
    }
}

impl RecordSource for CheckpointReader {
    fn read(&mut self) -> PtabResult<Option<(Vec<u8>, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }

        let mut len_raw = [0u8; 4];
        self.reader.read_exact(&mut len_raw)?;
        let key_len = u32::from_le_bytes(len_raw);

        if key_len == SENTINEL {
            let mut crc_raw = [0u8; 4];
            self.reader.read_exact(&mut crc_raw)?;
            let stored = u32::from_le_bytes(crc_raw);
            let computed = std::mem::replace(&mut self.hasher, crc32fast::Hasher::new())
                .finalize();
            self.done = true;
            if stored != computed {
                return Err(PtabError::CheckpointIncomplete {
                    epoch: self.epoch,
                    reason: format!(
                        "shard file checksum mismatch (stored {stored:#010x}, computed {computed:#010x})"
                    ),
                });
            }
            return Ok(None);
        }

        self.hasher.update(&len_raw);
        let mut key = vec![0u8; key_len as usize];
        self.read_section(&mut key)?;

        let mut value_len_raw = [0u8; 4];
        self.read_section(&mut value_len_raw)?;
        let mut value = vec![0u8; u32::from_le_bytes(value_len_raw) as usize];
        self.read_section(&mut value)?;

        Ok(Some((key, value)))
    }
}

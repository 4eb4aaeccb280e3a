//! # Record Coders
//!
//! Sink/source abstractions over sequences of encoded `(key, value)`
//! records. Shard stores serialize through a sink and rebuild through a
//! source; the flusher and the checkpoint layer supply the concrete ends
//! (an in-memory batch, a durable shard file).

use ptab_common::PtabResult;

/// Receives encoded records one at a time.
pub trait RecordSink {
    fn write(&mut self, key: &[u8], value: &[u8]) -> PtabResult<()>;
}

/// Yields encoded records one at a time until exhausted.
pub trait RecordSource {
    fn read(&mut self) -> PtabResult<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Collects records into a vector, for wire batches and tests.
#[derive(Default)]
pub struct VecSink {
    records: Vec<(Vec<u8>, Vec<u8>)>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_records(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSink for VecSink {
    fn write(&mut self, key: &[u8], value: &[u8]) -> PtabResult<()> {
        self.records.push((key.to_vec(), value.to_vec()));
        Ok(())
    }
}

/// Reads records back out of a borrowed batch.
pub struct SliceSource<'a> {
    records: &'a [(Vec<u8>, Vec<u8>)],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(records: &'a [(Vec<u8>, Vec<u8>)]) -> Self {
        SliceSource { records, pos: 0 }
    }
}

impl RecordSource for SliceSource<'_> {
    fn read(&mut self) -> PtabResult<Option<(Vec<u8>, Vec<u8>)>> {
        match self.records.get(self.pos) {
            Some((key, value)) => {
                self.pos += 1;
                Ok(Some((key.clone(), value.clone())))
            }
            None => Ok(None),
        }
    }
}

//! # Flusher
//!
//! Background drain of outbound buffers: every interval (tightened once
//! pending work crosses the high-water mark) the flusher extracts swapped
//! buffers from each table and ships them as PUT_REQUEST batches to the
//! owning ranks. Flushing is fire-and-forget with respect to kernels; the
//! master's quiescence poll makes it complete before a barrier releases.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use ptab_common::message::{self, PutRequest, Tag};
use ptab_common::{MessageBus, PtabResult, TableId};
use ptab_table::Table;

use crate::metrics::WorkerMetrics;

/// Interval used while pending work exceeds the high-water mark.
const PRESSURE_INTERVAL: Duration = Duration::from_micros(100);

struct FlusherState {
    stopped: bool,
}

/// Shared drain engine; the worker triggers it on demand, the background
/// thread on a timer.
pub struct Flusher {
    tables: Arc<HashMap<TableId, Arc<dyn Table>>>,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<WorkerMetrics>,
    interval: Duration,
    high_water: usize,
    state: Mutex<FlusherState>,
    wake: Condvar,
    /// Serializes on-demand and periodic drains.
    drain: Mutex<()>,
}

impl Flusher {
    pub fn new(
        tables: Arc<HashMap<TableId, Arc<dyn Table>>>,
        bus: Arc<dyn MessageBus>,
        metrics: Arc<WorkerMetrics>,
        interval: Duration,
        high_water: usize,
    ) -> Arc<Self> {
        Arc::new(Flusher {
            tables,
            bus,
            metrics,
            interval,
            high_water,
            state: Mutex::new(FlusherState { stopped: false }),
            wake: Condvar::new(),
            drain: Mutex::new(()),
        })
    }

    /// Starts the periodic drain thread. Errors are fatal to the worker
    /// and surface when the handle is joined at shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<PtabResult<()>> {
        std::thread::spawn(move || {
            let result = self.run();
            if let Err(err) = &result {
                error!(error = %err, "flusher failed");
            }
            result
        })
    }

    fn run(&self) -> PtabResult<()> {
        loop {
            let timeout = if self.pending() > self.high_water {
                PRESSURE_INTERVAL
            } else {
                self.interval
            };
            {
                let mut state = self.state.lock();
                if state.stopped {
                    return Ok(());
                }
                self.wake.wait_for(&mut state, timeout);
                if state.stopped {
                    return Ok(());
                }
            }
            self.flush_now()?;
        }
    }

    /// Drains every table's outbound buffers once.
    pub fn flush_now(&self) -> PtabResult<()> {
        let _serialized = self.drain.lock();
        let mut shipped = 0usize;
        for table in self.tables.values() {
            for batch in table.pending_updates()? {
                let entries = batch.entries.len();
                let put = PutRequest {
                    table: batch.table,
                    shard: batch.shard,
                    entries: batch.entries,
                };
                self.bus
                    .send(batch.owner, Tag::PutRequest, message::encode_message(&put)?)?;
                self.metrics.record_put_sent();
                shipped += entries;
                trace!(
                    table = %batch.table,
                    shard = batch.shard,
                    owner = batch.owner,
                    entries,
                    "shipped update batch"
                );
            }
        }
        self.metrics.record_flush_cycle();
        if shipped > 0 {
            debug!(entries = shipped, "flushed outbound buffers");
        }
        Ok(())
    }

    /// Entries currently buffered across all tables.
    pub fn pending(&self) -> usize {
        self.tables
            .values()
            .map(|table| table.pending_write_bytes())
            .sum()
    }

    /// Signals the drain thread to exit after its current cycle.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.wake.notify_all();
    }
}

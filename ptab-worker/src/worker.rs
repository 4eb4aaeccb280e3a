//! # Worker
//!
//! One worker process of the fleet. Three threads share the worker's bus
//! endpoint and tables:
//!
//! - the *network* thread (this module's dispatch loop) services peer and
//!   master traffic;
//! - the *kernel* thread executes user methods, one shard at a time;
//! - the *flusher* thread drains outbound buffers.
//!
//! The network thread never executes kernels, so a worker keeps serving
//! GET/PUT requests while its own kernel blocks on a remote fetch.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use ptab_common::message::{
    self, Assignment, CheckpointDone, CheckpointRequest, FlushDone, GetRequest, GetResponse,
    KernelDone, PutRequest, ResetDone, ResetRequest, RestoreDone, RestoreRequest, RunKernel,
    Tag,
};
use ptab_common::{Config, MessageBus, PtabError, PtabResult, Rank, TableId, MASTER_RANK};
use ptab_table::{Table, TableRegistry};

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::flusher::Flusher;
use crate::kernel::{KernelContext, KernelRegistry};
use crate::metrics::WorkerMetrics;

/// Tags the network thread listens on. GET_RESPONSE is deliberately
/// absent: the kernel thread consumes it while blocked on a remote fetch.
const DISPATCH_TAGS: [Tag; 8] = [
    Tag::GetRequest,
    Tag::PutRequest,
    Tag::RunKernel,
    Tag::Flush,
    Tag::Checkpoint,
    Tag::Restore,
    Tag::Reset,
    Tag::Shutdown,
];

/// One worker: rank, tables, kernels, and the dispatch loop.
pub struct Worker {
    rank: Rank,
    config: Config,
    bus: Arc<dyn MessageBus>,
    tables: Arc<HashMap<TableId, Arc<dyn Table>>>,
    kernels: Arc<KernelRegistry>,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(
        config: Config,
        registry: &TableRegistry,
        kernels: Arc<KernelRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> PtabResult<Self> {
        config.validate()?;
        let tables = Arc::new(registry.create_all(&bus));
        Ok(Worker {
            rank: bus.rank(),
            config,
            bus,
            tables,
            kernels,
            metrics: Arc::new(WorkerMetrics::new()),
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Serves until SHUTDOWN arrives. Consumes the worker.
    pub fn run(self) -> PtabResult<()> {
        let Worker {
            rank,
            config,
            bus,
            tables,
            kernels,
            metrics,
        } = self;

        // The master's placement broadcast precedes all other traffic, and
        // the worker reads it before entering the dispatch loop.
        let payload = bus.recv_from(MASTER_RANK, Tag::Assign)?;
        let assignment: Assignment = message::decode_message(&payload)?;
        for placement in &assignment.tables {
            let table = tables
                .get(&placement.table)
                .ok_or(PtabError::UnknownTable(placement.table))?;
            table.assign(&placement.owners, rank)?;
        }
        info!(rank, tables = tables.len(), "worker assigned");

        let flusher = Flusher::new(
            Arc::clone(&tables),
            Arc::clone(&bus),
            Arc::clone(&metrics),
            config.flush_interval,
            config.flush_high_water,
        );
        let flusher_handle = Arc::clone(&flusher).spawn();

        let (kernel_tx, kernel_rx) = mpsc::channel::<RunKernel>();
        let kernel_handle = spawn_kernel_thread(
            rank,
            kernel_rx,
            Arc::clone(&tables),
            Arc::clone(&kernels),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        );

        loop {
            let (tag, from, payload) = bus.recv_any(&DISPATCH_TAGS)?;
            match tag {
                Tag::GetRequest => {
                    handle_get_request(&bus, &tables, &metrics, from, &payload)?;
                }
                Tag::PutRequest => {
                    apply_put_request(&tables, &metrics, &payload)?;
                }
                Tag::RunKernel => {
                    let run: RunKernel = message::decode_message(&payload)?;
                    kernel_tx.send(run).map_err(|_| PtabError::WorkerFailed {
                        rank,
                        message: "kernel thread exited early".to_owned(),
                    })?;
                }
                Tag::Flush => {
                    // Apply whatever peers have already shipped before
                    // reporting, so the master's totals converge.
                    while let Some((_, put)) = bus.try_recv(Tag::PutRequest) {
                        apply_put_request(&tables, &metrics, &put)?;
                    }
                    flusher.flush_now()?;
                    let report = FlushDone {
                        rank,
                        pending: flusher.pending(),
                        puts_sent: metrics.puts_sent(),
                        puts_applied: metrics.puts_applied(),
                    };
                    bus.send(from, Tag::FlushDone, message::encode_message(&report)?)?;
                }
                Tag::Checkpoint => {
                    let request: CheckpointRequest = message::decode_message(&payload)?;
                    let result = write_checkpoint(
                        &config.checkpoint_dir,
                        request.epoch,
                        &request.tables,
                        &tables,
                    );
                    match &result {
                        Ok(()) => info!(rank, epoch = request.epoch, "checkpoint written"),
                        Err(err) => warn!(rank, epoch = request.epoch, error = %err, "checkpoint failed"),
                    }
                    let done = CheckpointDone {
                        rank,
                        error: result.err().map(|err| err.to_string()),
                    };
                    bus.send(from, Tag::CheckpointDone, message::encode_message(&done)?)?;
                }
                Tag::Restore => {
                    let request: RestoreRequest = message::decode_message(&payload)?;
                    let result = load_checkpoint(
                        &config.checkpoint_dir,
                        request.epoch,
                        &request.tables,
                        &tables,
                    );
                    if let Err(err) = &result {
                        warn!(rank, epoch = request.epoch, error = %err, "restore failed; clearing partial state");
                        for id in &request.tables {
                            if let Some(table) = tables.get(id) {
                                for shard in table.owned_shards() {
                                    table.clear_shard(shard);
                                }
                            }
                        }
                    } else {
                        info!(rank, epoch = request.epoch, "restore complete");
                    }
                    let done = RestoreDone {
                        rank,
                        error: result.err().map(|err| err.to_string()),
                    };
                    bus.send(from, Tag::RestoreDone, message::encode_message(&done)?)?;
                }
                Tag::Reset => {
                    let request: ResetRequest = message::decode_message(&payload)?;
                    for id in &request.tables {
                        if let Some(table) = tables.get(id) {
                            for shard in table.owned_shards() {
                                table.clear_shard(shard);
                            }
                        }
                    }
                    debug!(rank, tables = request.tables.len(), "tables reset");
                    let done = ResetDone { rank };
                    bus.send(from, Tag::ResetDone, message::encode_message(&done)?)?;
                }
                Tag::Shutdown => {
                    debug!(rank, "shutdown requested");
                    break;
                }
                _ => unreachable!("tag {tag:?} is not dispatched to the network thread"),
            }
        }

        // Drain buffers before exit so no update is stranded locally.
        flusher.flush_now()?;
        flusher.stop();
        drop(kernel_tx);
        join_thread(flusher_handle, rank, "flusher")?;
        join_thread(kernel_handle, rank, "kernel")?;
        info!(rank, "worker stopped");
        Ok(())
    }
}

/// Creates a worker and runs it on a dedicated thread.
pub fn spawn_worker(
    config: Config,
    registry: &TableRegistry,
    kernels: Arc<KernelRegistry>,
    bus: Arc<dyn MessageBus>,
) -> PtabResult<JoinHandle<PtabResult<()>>> {
    let worker = Worker::new(config, registry, kernels, bus)?;
    let handle = std::thread::Builder::new()
        .name(format!("ptab-worker-{}", worker.rank()))
        .spawn(move || worker.run())?;
    Ok(handle)
}

fn join_thread(
    handle: JoinHandle<PtabResult<()>>,
    rank: Rank,
    name: &str,
) -> PtabResult<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(PtabError::WorkerFailed {
            rank,
            message: format!("{name} thread panicked"),
        }),
    }
}

fn handle_get_request(
    bus: &Arc<dyn MessageBus>,
    tables: &HashMap<TableId, Arc<dyn Table>>,
    metrics: &WorkerMetrics,
    from: Rank,
    payload: &[u8],
) -> PtabResult<()> {
    let request: GetRequest = message::decode_message(payload)?;
    let lookup = tables
        .get(&request.table)
        .ok_or(PtabError::UnknownTable(request.table))
        .and_then(|table| table.handle_get(&request.key));

    // Routing and schema violations are reported to the requester rather
    // than killing this worker mid-reply; the requesting kernel fails and
    // the master treats that as fatal.
    let response = match lookup {
        Ok(value) => GetResponse { value, error: None },
        Err(err) => GetResponse {
            value: None,
            error: Some(err.to_string()),
        },
    };
    bus.send(from, Tag::GetResponse, message::encode_message(&response)?)?;
    metrics.record_get_served();
    Ok(())
}

fn apply_put_request(
    tables: &HashMap<TableId, Arc<dyn Table>>,
    metrics: &WorkerMetrics,
    payload: &[u8],
) -> PtabResult<()> {
    let put: PutRequest = message::decode_message(payload)?;
    let table = tables
        .get(&put.table)
        .ok_or(PtabError::UnknownTable(put.table))?;
    table.apply_updates(put.shard, &put.entries)?;
    metrics.record_put_applied();
    Ok(())
}

fn write_checkpoint(
    root: &Path,
    epoch: u64,
    table_ids: &[TableId],
    tables: &HashMap<TableId, Arc<dyn Table>>,
) -> PtabResult<()> {
    for id in table_ids {
        let table = tables.get(id).ok_or(PtabError::UnknownTable(*id))?;
        let fingerprint = table.fingerprint();
        for shard in table.owned_shards() {
            let mut writer = CheckpointWriter::create(root, epoch, &fingerprint, shard)?;
            table.serialize_shard(shard, &mut writer)?;
            writer.finish()?;
        }
    }
    Ok(())
}

fn load_checkpoint(
    root: &Path,
    epoch: u64,
    table_ids: &[TableId],
    tables: &HashMap<TableId, Arc<dyn Table>>,
) -> PtabResult<()> {
    for id in table_ids {
        let table = tables.get(id).ok_or(PtabError::UnknownTable(*id))?;
        let fingerprint = table.fingerprint();
        for shard in table.owned_shards() {
            let mut reader = CheckpointReader::open(root, epoch, &fingerprint, shard)
                .map_err(|err| PtabError::CheckpointIncomplete {
                    epoch,
                    reason: format!("table {id} shard {shard}: {err}"),
                })?;
            table.restore_shard(shard, &mut reader)?;
        }
    }
    Ok(())
}

fn spawn_kernel_thread(
    rank: Rank,
    dispatches: mpsc::Receiver<RunKernel>,
    tables: Arc<HashMap<TableId, Arc<dyn Table>>>,
    kernels: Arc<KernelRegistry>,
    bus: Arc<dyn MessageBus>,
    metrics: Arc<WorkerMetrics>,
) -> JoinHandle<PtabResult<()>> {
    std::thread::spawn(move || {
        while let Ok(run) = dispatches.recv() {
            let started = Instant::now();

            // Shadow copies of remote reads must not outlive the barrier
            // that precedes every dispatch.
            for table in tables.values() {
                table.reset_shadows();
            }

            let result = run_dispatch(rank, &run, &tables, &kernels, &metrics);
            if let Err(err) = &result {
                warn!(rank, kernel = %run.kernel, method = %run.method, error = %err, "kernel dispatch failed");
            }
            let done = KernelDone {
                rank,
                shards: run.shards.len(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: result.err().map(|err| err.to_string()),
            };
            bus.send(MASTER_RANK, Tag::KernelDone, message::encode_message(&done)?)?;
        }
        Ok(())
    })
}

fn run_dispatch(
    rank: Rank,
    run: &RunKernel,
    tables: &HashMap<TableId, Arc<dyn Table>>,
    kernels: &KernelRegistry,
    metrics: &WorkerMetrics,
) -> PtabResult<()> {
    let method = kernels.lookup(&run.kernel, &run.method)?;
    for &shard in &run.shards {
        let mut ctx = KernelContext::new(rank, shard, &run.params, tables);
        metrics.record_kernel_call();
        method.as_ref()(&mut ctx).map_err(|err| PtabError::KernelFailed {
            kernel: run.kernel.clone(),
            method: run.method.clone(),
            shard,
            message: err.to_string(),
        })?;
        debug!(rank, shard, kernel = %run.kernel, method = %run.method, "kernel call finished");
    }
    Ok(())
}

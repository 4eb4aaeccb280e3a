//! # Master
//!
//! A single thread that never executes kernels. Per iteration it
//! broadcasts the run descriptor, waits for every kernel completion,
//! quiesces the fleet (all buffers flushed, all shipped updates applied),
//! and optionally commits a checkpoint. The quiescence poll is what turns
//! "updates from iteration i" into a happens-before edge for iteration
//! i + 1.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use ptab_common::message::{
    self, Assignment, CheckpointDone, CheckpointPolicy, CheckpointRequest, FlushDone,
    FlushRequest, KernelDone, ResetDone, ResetRequest, RestoreDone, RestoreRequest, RunKernel,
    Shutdown, Tag, TablePlacement,
};
use ptab_common::{
    Config, MessageBus, ParamMap, PtabError, PtabResult, Rank, ShardId, TableId,
};
use ptab_table::TableRegistry;

use crate::manifest::Manifest;

/// One iteration's worth of work: which method to run over which table,
/// with which parameters, and whether to checkpoint afterwards.
#[derive(Debug, Clone)]
pub struct RunDescriptor {
    pub kernel: String,
    pub method: String,
    pub table: TableId,
    pub params: ParamMap,
    pub checkpoint: CheckpointPolicy,
    pub checkpoint_tables: Vec<TableId>,
}

impl RunDescriptor {
    pub fn new(kernel: &str, method: &str, table: TableId) -> Self {
        RunDescriptor {
            kernel: kernel.to_owned(),
            method: method.to_owned(),
            table,
            params: ParamMap::new(),
            checkpoint: CheckpointPolicy::None,
            checkpoint_tables: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    /// Requests a master-controlled checkpoint of `tables` after the
    /// iteration quiesces.
    pub fn with_checkpoint(mut self, tables: Vec<TableId>) -> Self {
        self.checkpoint = CheckpointPolicy::MasterControlled;
        self.checkpoint_tables = tables;
        self
    }
}

/// The coordinator of the fleet.
pub struct Master {
    config: Config,
    bus: Arc<dyn MessageBus>,
    placements: Vec<TablePlacement>,
}

impl Master {
    /// Computes round-robin shard placement for every registered table and
    /// broadcasts it; workers read the assignment before any other
    /// message.
    pub fn new(
        config: Config,
        registry: &TableRegistry,
        bus: Arc<dyn MessageBus>,
    ) -> PtabResult<Self> {
        config.validate()?;

        let mut placements = Vec::new();
        for id in registry.ids() {
            let shards = registry.num_shards(id)?;
            let owners: Vec<Rank> = (0..shards)
                .map(|shard| 1 + (shard % config.num_workers))
                .collect();
            placements.push(TablePlacement { table: id, owners });
        }

        let assignment = Assignment {
            tables: placements.clone(),
        };
        bus.broadcast(Tag::Assign, message::encode_message(&assignment)?)?;
        info!(
            tables = placements.len(),
            workers = config.num_workers,
            "shard assignment broadcast"
        );

        Ok(Master {
            config,
            bus,
            placements,
        })
    }

    fn owners(&self, table: TableId) -> PtabResult<&[Rank]> {
        self.placements
            .iter()
            .find(|placement| placement.table == table)
            .map(|placement| placement.owners.as_slice())
            .ok_or(PtabError::UnknownTable(table))
    }

    /// Runs the descriptor's method once per shard across the whole fleet,
    /// then quiesces and (if requested) checkpoints.
    pub fn run_all(&mut self, descriptor: &RunDescriptor) -> PtabResult<()> {
        let owners = self.owners(descriptor.table)?.to_vec();

        let mut expected = 0usize;
        for worker in self.config.worker_ranks() {
            let shards: Vec<ShardId> = owners
                .iter()
                .enumerate()
                .filter(|(_, owner)| **owner == worker)
                .map(|(shard, _)| shard)
                .collect();
            for chunk in shards.chunks(self.config.slots) {
                self.dispatch(worker, descriptor, chunk)?;
                expected += 1;
            }
        }

        self.wait_for_kernels(expected)?;
        self.quiesce()?;

        if descriptor.checkpoint == CheckpointPolicy::MasterControlled {
            let epoch = descriptor.params.get_int("iteration").unwrap_or(0).max(0) as u64;
            self.checkpoint(epoch, &descriptor.checkpoint_tables, &descriptor.params)?;
        }
        Ok(())
    }

    /// Runs the descriptor's method exactly once, on shard 0's owner.
    pub fn run_one(&mut self, descriptor: &RunDescriptor) -> PtabResult<()> {
        let owners = self.owners(descriptor.table)?;
        let owner = owners.first().copied().ok_or_else(|| {
            PtabError::Config(format!("table {} has no shards", descriptor.table))
        })?;
        self.dispatch(owner, descriptor, &[0])?;
        self.wait_for_kernels(1)?;
        self.quiesce()
    }

    fn dispatch(
        &self,
        worker: Rank,
        descriptor: &RunDescriptor,
        shards: &[ShardId],
    ) -> PtabResult<()> {
        let run = RunKernel {
            kernel: descriptor.kernel.clone(),
            method: descriptor.method.clone(),
            table: descriptor.table,
            shards: shards.to_vec(),
            params: descriptor.params.clone(),
            checkpoint: descriptor.checkpoint,
            checkpoint_tables: descriptor.checkpoint_tables.clone(),
        };
        debug!(worker, shards = shards.len(), kernel = %run.kernel, method = %run.method, "dispatching kernel");
        self.bus
            .send(worker, Tag::RunKernel, message::encode_message(&run)?)
    }

    /// Collects every outstanding completion; the first reported kernel
    /// error is fatal to the job (after draining the rest, so no stale
    /// completion leaks into the next iteration).
    fn wait_for_kernels(&self, expected: usize) -> PtabResult<()> {
        let mut failure: Option<PtabError> = None;
        for _ in 0..expected {
            let (_, payload) = self.bus.recv(Tag::KernelDone)?;
            let done: KernelDone = message::decode_message(&payload)?;
            debug!(
                rank = done.rank,
                shards = done.shards,
                elapsed_ms = done.elapsed_ms,
                "kernel dispatch complete"
            );
            if let Some(error) = done.error {
                if failure.is_none() {
                    failure = Some(PtabError::WorkerFailed {
                        rank: done.rank,
                        message: error,
                    });
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Polls FLUSH until nothing is buffered anywhere, every shipped
    /// update has been applied, and the totals are stable across rounds.
    fn quiesce(&self) -> PtabResult<()> {
        let mut last_sent = u64::MAX;
        loop {
            let request = message::encode_message(&FlushRequest)?;
            for worker in self.config.worker_ranks() {
                self.bus.send(worker, Tag::Flush, request.clone())?;
            }

            let mut pending = 0usize;
            let mut sent = 0u64;
            let mut applied = 0u64;
            for worker in self.config.worker_ranks() {
                let payload = self.bus.recv_from(worker, Tag::FlushDone)?;
                let report: FlushDone = message::decode_message(&payload)?;
                pending += report.pending;
                sent += report.puts_sent;
                applied += report.puts_applied;
            }
            trace!(pending, sent, applied, "quiescence poll");

            if pending == 0 && sent == applied && sent == last_sent {
                return Ok(());
            }
            last_sent = sent;
        }
    }

    fn checkpoint(&self, epoch: u64, tables: &[TableId], params: &ParamMap) -> PtabResult<()> {
        let request = CheckpointRequest {
            epoch,
            tables: tables.to_vec(),
        };
        let payload = message::encode_message(&request)?;
        for worker in self.config.worker_ranks() {
            self.bus.send(worker, Tag::Checkpoint, payload.clone())?;
        }

        for worker in self.config.worker_ranks() {
            let payload = self.bus.recv_from(worker, Tag::CheckpointDone)?;
            let done: CheckpointDone = message::decode_message(&payload)?;
            if let Some(error) = done.error {
                return Err(PtabError::WorkerFailed {
                    rank: done.rank,
                    message: error,
                });
            }
        }

        // Manifest last: a crash before this point leaves the previous
        // checkpoint authoritative and the new shard files unreferenced.
        let manifest = Manifest {
            epoch,
            tables: tables.to_vec(),
            params: params.clone(),
        };
        manifest.store(&self.config.checkpoint_dir)?;
        info!(epoch, tables = tables.len(), "checkpoint committed");
        Ok(())
    }

    /// Restores the latest checkpoint if one exists, returning its saved
    /// parameter map; the caller resumes from `iteration + 1`. Any worker
    /// that cannot provide its shards discards the checkpoint and the
    /// system starts fresh.
    pub fn restore(&mut self) -> PtabResult<Option<ParamMap>> {
        let manifest = match Manifest::load(&self.config.checkpoint_dir)? {
            Some(manifest) => manifest,
            None => return Ok(None),
        };

        let request = RestoreRequest {
            epoch: manifest.epoch,
            tables: manifest.tables.clone(),
            params: manifest.params.clone(),
        };
        let payload = message::encode_message(&request)?;
        for worker in self.config.worker_ranks() {
            self.bus.send(worker, Tag::Restore, payload.clone())?;
        }

        let mut failure = None;
        for worker in self.config.worker_ranks() {
            let payload = self.bus.recv_from(worker, Tag::RestoreDone)?;
            let done: RestoreDone = message::decode_message(&payload)?;
            if let Some(error) = done.error {
                failure = Some((done.rank, error));
            }
        }

        if let Some((rank, error)) = failure {
            warn!(rank, error = %error, epoch = manifest.epoch, "checkpoint incomplete; starting fresh");
            // Workers that did load their shards must drop them too, or a
            // fresh initialization would merge over stale values.
            self.reset_tables(&manifest.tables)?;
            return Ok(None);
        }
        info!(epoch = manifest.epoch, "checkpoint restored");
        Ok(Some(manifest.params))
    }

    fn reset_tables(&self, tables: &[TableId]) -> PtabResult<()> {
        let request = ResetRequest {
            tables: tables.to_vec(),
        };
        let payload = message::encode_message(&request)?;
        for worker in self.config.worker_ranks() {
            self.bus.send(worker, Tag::Reset, payload.clone())?;
        }
        for worker in self.config.worker_ranks() {
            let payload = self.bus.recv_from(worker, Tag::ResetDone)?;
            let _: ResetDone = message::decode_message(&payload)?;
        }
        Ok(())
    }

    /// Broadcasts SHUTDOWN; workers drain their buffers and exit.
    pub fn shutdown(self) -> PtabResult<()> {
        self.bus
            .broadcast(Tag::Shutdown, message::encode_message(&Shutdown)?)?;
        info!("shutdown broadcast");
        Ok(())
    }
}

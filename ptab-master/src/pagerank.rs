//! # PageRank Workload
//!
//! PageRank over a synthetic site-partitioned web graph, the canonical
//! exercise for the table framework: two ping-pong rank tables with a sum
//! accumulator, site-based sharding so a page's outlinks mostly stay in
//! its own shard, and an optional per-iteration checkpoint of the table
//! being written.
//!
//! The graph is derived deterministically from a seed, so every worker
//! (and the single-process reference below) regenerates identical
//! adjacency without shipping edges around.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use ptab_common::{
    BincodeMarshal, Config, FixedMarshal, ParamMap, PtabError, PtabResult, ShardId, TableId,
};
use ptab_table::{FnSharder, Sum, TableDescriptor, TableRegistry};
use ptab_worker::{KernelContext, KernelRegistry};

use crate::master::{Master, RunDescriptor};

/// The two rank tables; which one is "current" alternates per iteration.
pub const TABLE_A: TableId = TableId(0);
pub const TABLE_B: TableId = TableId(1);

/// Fraction of a page's rank propagated along its outlinks; the rest
/// restarts uniformly.
pub const PROPAGATION: f32 = 0.8;

/// A page, identified by its site and its index within the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub site: u32,
    pub page: u32,
}

/// Shorthand constructor used all over the tests.
pub fn page(site: u32, page: u32) -> PageId {
    PageId { site, page }
}

fn site_shard(page: &PageId, num_shards: usize) -> ShardId {
    page.site as usize % num_shards
}

/// Shape and seed of the synthetic graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphSpec {
    pub sites: u32,
    pub pages_per_site: u32,
    /// Outlinks per page.
    pub density: u32,
    pub seed: u64,
}

impl GraphSpec {
    pub fn nodes(&self) -> u64 {
        self.sites as u64 * self.pages_per_site as u64
    }

    /// Total rank is seeded as one unit per page.
    fn initial_rank(&self) -> f32 {
        1.0
    }

    fn restart_rank(&self) -> f32 {
        let total = self.nodes() as f32;
        (1.0 - PROPAGATION) * (total / self.nodes() as f32)
    }

    pub fn write_params(&self, params: &mut ParamMap) {
        params.set_int("sites", self.sites as i64);
        params.set_int("pages_per_site", self.pages_per_site as i64);
        params.set_int("density", self.density as i64);
        params.set_int("seed", self.seed as i64);
    }

    pub fn from_params(params: &ParamMap) -> PtabResult<Self> {
        let read = |name: &str| {
            params
                .get_int(name)
                .ok_or_else(|| PtabError::Config(format!("missing graph parameter {name}")))
        };
        Ok(GraphSpec {
            sites: read("sites")? as u32,
            pages_per_site: read("pages_per_site")? as u32,
            density: read("density")? as u32,
            seed: read("seed")? as u64,
        })
    }

    /// Deterministic outlinks of one page: mostly intra-site, with one in
    /// ten links escaping to a random site.
    pub fn outlinks(&self, page: PageId) -> Vec<PageId> {
        let stream = ((page.site as u64) << 32) | page.page as u64;
        let mut rng = StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        (0..self.density)
            .map(|_| {
                let site = if rng.gen_range(0..10u32) != 0 {
                    page.site
                } else {
                    rng.gen_range(0..self.sites)
                };
                PageId {
                    site,
                    page: rng.gen_range(0..self.pages_per_site),
                }
            })
            .collect()
    }

    /// Every page whose site lands on `shard`.
    pub fn local_pages(&self, shard: ShardId, num_shards: usize) -> Vec<PageId> {
        (0..self.sites)
            .filter(|site| *site as usize % num_shards == shard)
            .flat_map(|site| {
                (0..self.pages_per_site).map(move |index| PageId { site, page: index })
            })
            .collect()
    }
}

/// `(curr, next)` table ids for an iteration.
pub fn tables_for(iteration: i64) -> (TableId, TableId) {
    if iteration % 2 == 0 {
        (TABLE_A, TABLE_B)
    } else {
        (TABLE_B, TABLE_A)
    }
}

/// Registers both rank tables, sized for the graph up front.
pub fn register_tables(
    registry: &mut TableRegistry,
    shards: usize,
    spec: &GraphSpec,
) -> PtabResult<()> {
    for id in [TABLE_A, TABLE_B] {
        registry.register(
            TableDescriptor::<PageId, f32>::new(
                id,
                shards,
                BincodeMarshal::new(),
                FixedMarshal,
                FnSharder(site_shard),
                Sum,
            )
            .with_initial_capacity(2 * spec.nodes() as usize),
        )?;
    }
    Ok(())
}

/// Registers the kernel methods the master dispatches by name.
pub fn register_kernels(kernels: &mut KernelRegistry) {
    kernels.register("PageRank", "initialize", initialize);
    kernels.register("PageRank", "iterate", iterate);
    kernels.register("PageRank", "reset", reset);
    kernels.register("PageRank", "status", status);
}

fn initialize(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    let spec = GraphSpec::from_params(ctx.params())?;
    let curr = ctx.table::<PageId, f32>(TABLE_A)?;
    let shard = ctx.current_shard();
    for page in spec.local_pages(shard, curr.descriptor().num_shards) {
        curr.update(page, spec.initial_rank());
    }
    Ok(())
}

fn iterate(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    let spec = GraphSpec::from_params(ctx.params())?;
    let iteration = ctx.params().get_int("iteration").unwrap_or(0);
    let (curr_id, next_id) = tables_for(iteration);
    let curr = ctx.table::<PageId, f32>(curr_id)?;
    let next = ctx.table::<PageId, f32>(next_id)?;

    let shard = ctx.current_shard();
    for page in spec.local_pages(shard, curr.descriptor().num_shards) {
        next.update(page, spec.restart_rank());

        let rank = curr.get_local(&page)?;
        let targets = spec.outlinks(page);
        let contribution = PROPAGATION * rank / targets.len() as f32;
        for target in targets {
            next.update(target, contribution);
        }
    }
    Ok(())
}

fn reset(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    let iteration = ctx.params().get_int("iteration").unwrap_or(0);
    // The retiring table becomes the write target of the next iteration.
    let (curr_id, _) = tables_for(iteration);
    ctx.table::<PageId, f32>(curr_id)?
        .clear(ctx.current_shard());
    Ok(())
}

fn status(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    let iteration = ctx.params().get_int("iteration").unwrap_or(0);
    let (_, next_id) = tables_for(iteration);
    let table = ctx.table::<PageId, f32>(next_id)?;
    let rank = table.get_local(&page(0, 0))?;
    info!(iteration, rank = rank as f64, "pagerank status");
    Ok(())
}

/// Runs the full loop against a live fleet: initialize (or restore), then
/// iterate/reset/status per iteration. Final ranks land in
/// `tables_for(config.iterations - 1).1`.
pub fn drive(master: &mut Master, config: &Config, spec: &GraphSpec) -> PtabResult<()> {
    let mut params = ParamMap::new();
    spec.write_params(&mut params);

    let restored = if config.checkpoint {
        master.restore()?
    } else {
        None
    };
    let start = match restored {
        Some(saved) => {
            let resumed = saved.get_int("iteration").unwrap_or(-1) + 1;
            info!(resumed, "resuming from checkpoint");
            resumed
        }
        None => {
            let init = RunDescriptor::new("PageRank", "initialize", TABLE_A)
                .with_params(params.clone());
            master.run_all(&init)?;
            0
        }
    };

    for iteration in start..config.iterations as i64 {
        params.set_int("iteration", iteration);
        let (_, next_id) = tables_for(iteration);

        let mut run =
            RunDescriptor::new("PageRank", "iterate", TABLE_A).with_params(params.clone());
        if config.checkpoint {
            // Only the table being written needs to persist; the one being
            // read is the previous iteration's output.
            run = run.with_checkpoint(vec![next_id]);
        }
        master.run_all(&run)?;

        master.run_all(
            &RunDescriptor::new("PageRank", "reset", TABLE_A).with_params(params.clone()),
        )?;
        master.run_one(
            &RunDescriptor::new("PageRank", "status", TABLE_A).with_params(params.clone()),
        )?;
    }
    Ok(())
}

/// Single-process reference implementation used by the smoke test.
pub fn reference_ranks(spec: &GraphSpec, iterations: i64) -> HashMap<PageId, f32> {
    let all: Vec<PageId> = (0..spec.sites)
        .flat_map(|site| (0..spec.pages_per_site).map(move |index| PageId { site, page: index }))
        .collect();

    let mut curr: HashMap<PageId, f32> =
        all.iter().map(|page| (*page, spec.initial_rank())).collect();

    for _ in 0..iterations {
        let mut next: HashMap<PageId, f32> = HashMap::new();
        for page in &all {
            *next.entry(*page).or_insert(0.0) += spec.restart_rank();

            let rank = curr[page];
            let targets = spec.outlinks(*page);
            let contribution = PROPAGATION * rank / targets.len() as f32;
            for target in targets {
                *next.entry(target).or_insert(0.0) += contribution;
            }
        }
        curr = next;
    }
    curr
}

//! PageRank smoke tests: the distributed result must match a
//! single-process reference, with and without a mid-run checkpoint/restore
//! cycle.

mod common;

use ptab_common::{Config, ParamMap, PtabError, PtabResult};
use ptab_master::pagerank::{self, page, tables_for, GraphSpec, PageId, TABLE_A};
use ptab_master::RunDescriptor;
use ptab_table::TableRegistry;
use ptab_worker::{KernelContext, KernelRegistry};

fn verify(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    let spec = GraphSpec::from_params(ctx.params())?;
    let iterations = ctx
        .params()
        .get_int("iterations")
        .ok_or_else(|| PtabError::Workload("missing iterations parameter".to_owned()))?;
    let reference = pagerank::reference_ranks(&spec, iterations);

    let (_, result_id) = tables_for(iterations - 1);
    let table = ctx.table::<PageId, f32>(result_id)?;
    let shard = ctx.current_shard();
    for p in spec.local_pages(shard, table.descriptor().num_shards) {
        let got = table.get_local(&p)?;
        let want = reference[&p];
        // The headline node gets the tight bound; the rest allow for float
        // summation order differing across the fleet.
        let tolerance = if p == page(0, 0) { 1e-5 } else { 1e-4 };
        if (got - want).abs() > tolerance {
            return Err(PtabError::Workload(format!(
                "rank mismatch at {p:?}: got {got}, want {want}"
            )));
        }
    }
    Ok(())
}

fn kernels() -> KernelRegistry {
    let mut kernels = KernelRegistry::new();
    pagerank::register_kernels(&mut kernels);
    kernels.register("PageRank", "verify", verify);
    kernels
}

fn run_verify(fleet: &mut common::TestFleet, spec: &GraphSpec, iterations: i64) {
    let mut params = ParamMap::new();
    spec.write_params(&mut params);
    params.set_int("iterations", iterations);
    fleet
        .master
        .run_all(&RunDescriptor::new("PageRank", "verify", TABLE_A).with_params(params))
        .expect("distributed ranks match the reference");
}

#[test]
fn distributed_ranks_match_single_process_reference() {
    let spec = GraphSpec {
        sites: 10,
        pages_per_site: 100,
        density: 15,
        seed: 42,
    };
    let config = Config {
        num_workers: 2,
        shards: 4,
        iterations: 3,
        ..Config::default()
    };

    let mut registry = TableRegistry::new();
    pagerank::register_tables(&mut registry, config.shards, &spec).unwrap();
    let mut fleet = common::launch(&config, &registry, kernels());

    pagerank::drive(&mut fleet.master, &config, &spec).expect("pagerank run");
    run_verify(&mut fleet, &spec, config.iterations as i64);
    fleet.shutdown();
}

#[test]
fn resumed_run_matches_uninterrupted_reference() {
    let spec = GraphSpec {
        sites: 6,
        pages_per_site: 20,
        density: 5,
        seed: 7,
    };
    let dir = tempfile::tempdir().unwrap();
    let base = Config {
        num_workers: 2,
        shards: 3,
        checkpoint: true,
        checkpoint_dir: dir.path().to_path_buf(),
        ..Config::default()
    };

    // First incarnation runs two of three iterations, checkpointing each,
    // then "crashes" (shuts down).
    let interrupted = Config {
        iterations: 2,
        ..base.clone()
    };
    let mut registry = TableRegistry::new();
    pagerank::register_tables(&mut registry, base.shards, &spec).unwrap();
    let mut fleet = common::launch(&interrupted, &registry, kernels());
    pagerank::drive(&mut fleet.master, &interrupted, &spec).expect("interrupted run");
    fleet.shutdown();

    // Second incarnation restores iteration 1 and runs only iteration 2.
    let resumed = Config {
        iterations: 3,
        ..base
    };
    let registry2 = {
        let mut registry = TableRegistry::new();
        pagerank::register_tables(&mut registry, resumed.shards, &spec).unwrap();
        registry
    };
    let mut fleet = common::launch(&resumed, &registry2, kernels());
    pagerank::drive(&mut fleet.master, &resumed, &spec).expect("resumed run");

    run_verify(&mut fleet, &spec, resumed.iterations as i64);
    fleet.shutdown();
}

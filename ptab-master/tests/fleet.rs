//! Fleet-level behavior over the in-process bus: cross-worker accumulation
//! through outbound buffers, remote-read caching, and kernel failure
//! propagation.

mod common;

use ptab_common::{Config, FixedMarshal, PtabError, PtabResult, TableId, Tag};
use ptab_master::RunDescriptor;
use ptab_table::{ModSharding, Sum, TableDescriptor, TableRegistry};
use ptab_worker::{KernelContext, KernelRegistry};

const RANKS: TableId = TableId(0);

fn two_worker_config() -> Config {
    Config {
        num_workers: 2,
        shards: 2,
        ..Config::default()
    }
}

fn f64_registry(shards: usize) -> TableRegistry {
    let mut registry = TableRegistry::new();
    registry
        .register(TableDescriptor::<u32, f64>::new(
            RANKS,
            shards,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            Sum,
        ))
        .expect("register table");
    registry
}

fn i64_registry(shards: usize) -> TableRegistry {
    let mut registry = TableRegistry::new();
    registry
        .register(TableDescriptor::<u32, i64>::new(
            RANKS,
            shards,
            FixedMarshal,
            FixedMarshal,
            ModSharding,
            Sum,
        ))
        .expect("register table");
    registry
}

fn seed_halves(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    let table = ctx.table::<u32, f64>(RANKS)?;
    // Key 1 lives on shard 1; the shard-0 call buffers two remote halves,
    // the shard-1 call adds one whole locally.
    match ctx.current_shard() {
        0 => {
            table.update(1, 0.5);
            table.update(1, 0.5);
        }
        _ => table.update(1, 1.0),
    }
    Ok(())
}

fn check_two(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    if ctx.current_shard() == 1 {
        let value = ctx.table::<u32, f64>(RANKS)?.get_local(&1)?;
        if (value - 2.0).abs() > 1e-12 {
            return Err(PtabError::Workload(format!("expected 2.0, got {value}")));
        }
    }
    Ok(())
}

#[test]
fn updates_accumulate_across_workers() {
    let mut kernels = KernelRegistry::new();
    kernels.register("Fleet", "seed", seed_halves);
    kernels.register("Fleet", "check", check_two);

    let registry = f64_registry(2);
    let config = two_worker_config();
    let mut fleet = common::launch(&config, &registry, kernels);

    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "seed", RANKS))
        .expect("seed iteration");
    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "check", RANKS))
        .expect("check iteration");
    fleet.shutdown();
}

fn seed_every_shard(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    // Every shard's call contributes 1.0 to key 0, owned by shard 0.
    ctx.table::<u32, f64>(RANKS)?.update(0, 1.0);
    Ok(())
}

fn check_fan_in(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    if ctx.current_shard() == 0 {
        let table = ctx.table::<u32, f64>(RANKS)?;
        let value = table.get_local(&0)?;
        let expected = table.descriptor().num_shards as f64;
        if (value - expected).abs() > 1e-12 {
            return Err(PtabError::Workload(format!(
                "expected {expected}, got {value}"
            )));
        }
    }
    Ok(())
}

#[test]
fn fan_in_from_three_workers() {
    let mut kernels = KernelRegistry::new();
    kernels.register("Fleet", "seed", seed_every_shard);
    kernels.register("Fleet", "check", check_fan_in);

    let registry = f64_registry(4);
    let config = Config {
        num_workers: 3,
        shards: 4,
        ..Config::default()
    };
    let mut fleet = common::launch(&config, &registry, kernels);

    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "seed", RANKS))
        .expect("seed iteration");
    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "check", RANKS))
        .expect("check iteration");
    fleet.shutdown();
}

fn seed_seven(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    if ctx.current_shard() == 1 {
        ctx.table::<u32, i64>(RANKS)?.update(3, 7);
    }
    Ok(())
}

fn read_seven_twice(ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    if ctx.current_shard() == 0 {
        let table = ctx.table::<u32, i64>(RANKS)?;
        for _ in 0..2 {
            let value = table.get(&3)?;
            if value != 7 {
                return Err(PtabError::Workload(format!("expected 7, got {value}")));
            }
        }
    }
    Ok(())
}

#[test]
fn remote_reads_are_cached_within_an_iteration() {
    let mut kernels = KernelRegistry::new();
    kernels.register("Fleet", "seed", seed_seven);
    kernels.register("Fleet", "read", read_seven_twice);

    let registry = i64_registry(2);
    let config = two_worker_config();
    let mut fleet = common::launch(&config, &registry, kernels);

    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "seed", RANKS))
        .expect("seed iteration");

    // Two reads, one round-trip: the second is served by the shadow copy.
    let before = fleet.bus.sent(Tag::GetRequest);
    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "read", RANKS))
        .expect("read iteration");
    let after = fleet.bus.sent(Tag::GetRequest);
    assert_eq!(after - before, 1);

    // A new dispatch drops the shadow, so the next read fetches again.
    fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "read", RANKS))
        .expect("second read iteration");
    assert_eq!(fleet.bus.sent(Tag::GetRequest) - after, 1);

    fleet.shutdown();
}

fn boom(_ctx: &mut KernelContext<'_>) -> PtabResult<()> {
    Err(PtabError::Workload("deliberate failure".to_owned()))
}

#[test]
fn kernel_errors_abort_the_iteration() {
    let mut kernels = KernelRegistry::new();
    kernels.register("Fleet", "boom", boom);

    let registry = i64_registry(2);
    let config = two_worker_config();
    let mut fleet = common::launch(&config, &registry, kernels);

    let result = fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "boom", RANKS));
    assert!(matches!(result, Err(PtabError::WorkerFailed { .. })));

    // An unknown method is reported the same way, not silently dropped.
    let result = fleet
        .master
        .run_all(&RunDescriptor::new("Fleet", "missing", RANKS));
    assert!(matches!(result, Err(PtabError::WorkerFailed { .. })));

    fleet.shutdown();
}

//! In-process PageRank demo: spins up a worker fleet and a master over the
//! local bus, runs the iteration loop, and optionally checkpoints between
//! iterations (set PTAB_CHECKPOINT_DIR to enable; rerunning with the same
//! directory resumes from the last completed iteration).

use std::str::FromStr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ptab_common::{Config, LocalBus, MessageBus};
use ptab_master::pagerank::{self, GraphSpec};
use ptab_master::Master;
use ptab_table::TableRegistry;
use ptab_worker::{spawn_worker, KernelRegistry};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let checkpoint_dir = std::env::var("PTAB_CHECKPOINT_DIR").ok();
    let config = Config {
        num_workers: env_or("PTAB_WORKERS", 2),
        shards: env_or("PTAB_SHARDS", 4),
        iterations: env_or("PTAB_ITERATIONS", 5),
        checkpoint: checkpoint_dir.is_some(),
        checkpoint_dir: checkpoint_dir
            .unwrap_or_else(|| "ptab-checkpoints".to_owned())
            .into(),
        ..Config::default()
    };
    let spec = GraphSpec {
        sites: env_or("PTAB_SITES", 10),
        pages_per_site: env_or("PTAB_PAGES_PER_SITE", 100),
        density: env_or("PTAB_DENSITY", 15),
        seed: env_or("PTAB_SEED", 42),
    };

    let mut registry = TableRegistry::new();
    pagerank::register_tables(&mut registry, config.shards, &spec)?;
    let mut kernels = KernelRegistry::new();
    pagerank::register_kernels(&mut kernels);
    let kernels = Arc::new(kernels);

    let mut endpoints = LocalBus::fleet(config.ranks());
    let master_bus = endpoints.remove(0);
    let mut workers = Vec::new();
    for bus in endpoints {
        let bus: Arc<dyn MessageBus> = Arc::new(bus);
        workers.push(spawn_worker(
            config.clone(),
            &registry,
            Arc::clone(&kernels),
            bus,
        )?);
    }

    let mut master = Master::new(config.clone(), &registry, Arc::new(master_bus))?;
    pagerank::drive(&mut master, &config, &spec)?;
    master.shutdown()?;

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
    }
    Ok(())
}

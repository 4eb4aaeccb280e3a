//! Shared harness for the fleet integration tests: spins up workers on
//! threads, hands back the master plus the master-side bus endpoint (whose
//! counters the tests observe), and joins everything on shutdown.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread::JoinHandle;

use ptab_common::{Config, LocalBus, MessageBus, PtabResult};
use ptab_master::Master;
use ptab_table::TableRegistry;
use ptab_worker::{spawn_worker, KernelRegistry};

pub struct TestFleet {
    pub master: Master,
    pub bus: LocalBus,
    workers: Vec<JoinHandle<PtabResult<()>>>,
}

pub fn launch(config: &Config, registry: &TableRegistry, kernels: KernelRegistry) -> TestFleet {
    let kernels = Arc::new(kernels);
    let mut endpoints = LocalBus::fleet(config.ranks());
    let master_bus = endpoints.remove(0);

    let mut workers = Vec::new();
    for bus in endpoints {
        let bus: Arc<dyn MessageBus> = Arc::new(bus);
        workers.push(
            spawn_worker(config.clone(), registry, Arc::clone(&kernels), bus)
                .expect("spawn worker"),
        );
    }

    let master = Master::new(config.clone(), registry, Arc::new(master_bus.clone()))
        .expect("master startup");
    TestFleet {
        master,
        bus: master_bus,
        workers,
    }
}

impl TestFleet {
    /// Broadcasts SHUTDOWN and joins every worker, surfacing any worker
    /// error as a test failure.
    pub fn shutdown(self) {
        let TestFleet {
            master, workers, ..
        } = self;
        master.shutdown().expect("shutdown broadcast");
        for worker in workers {
            worker
                .join()
                .expect("worker thread panicked")
                .expect("worker exited with error");
        }
    }
}

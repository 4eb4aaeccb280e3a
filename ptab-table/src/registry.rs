//! # Table Registry
//!
//! The process-wide catalog of registered tables. The registry is built by
//! the workload at startup and then threaded, by value or shared
//! reference, into master and worker construction; there are no global
//! singletons. After startup it is read-only.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;

use ptab_common::bus::MessageBus;
use ptab_common::{PtabError, PtabResult, TableId};

use crate::descriptor::{TableDescriptor, TableFingerprint};
use crate::global_table::{GlobalTable, Table};
use crate::{TableKey, TableValue};

type TableFactory = Arc<dyn Fn(Arc<dyn MessageBus>) -> Arc<dyn Table> + Send + Sync>;

/// Type-erased registration record for one table.
pub struct TableSpec {
    pub id: TableId,
    pub num_shards: usize,
    pub fingerprint: TableFingerprint,
    factory: TableFactory,
}

/// Ordered catalog of table specs with type-erased factories.
#[derive(Default)]
pub struct TableRegistry {
    specs: BTreeMap<TableId, TableSpec>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table. Ids must be unique; shard count must be positive.
    pub fn register<K: TableKey, V: TableValue>(
        &mut self,
        descriptor: TableDescriptor<K, V>,
    ) -> PtabResult<()> {
        if descriptor.num_shards == 0 {
            return Err(PtabError::Config(format!(
                "table {} registered with zero shards",
                descriptor.id
            )));
        }
        if self.specs.contains_key(&descriptor.id) {
            return Err(PtabError::Config(format!(
                "table id {} registered twice",
                descriptor.id
            )));
        }

        let descriptor = Arc::new(descriptor);
        let spec = TableSpec {
            id: descriptor.id,
            num_shards: descriptor.num_shards,
            fingerprint: descriptor.fingerprint(),
            factory: Arc::new(move |bus| {
                GlobalTable::new(Arc::clone(&descriptor), bus) as Arc<dyn Table>
            }),
        };
        self.specs.insert(spec.id, spec);
        Ok(())
    }

    /// Registered table ids in ascending order.
    pub fn ids(&self) -> Vec<TableId> {
        self.specs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn num_shards(&self, id: TableId) -> PtabResult<usize> {
        self.specs
            .get(&id)
            .map(|spec| spec.num_shards)
            .ok_or(PtabError::UnknownTable(id))
    }

    pub fn fingerprint(&self, id: TableId) -> PtabResult<&TableFingerprint> {
        self.specs
            .get(&id)
            .map(|spec| &spec.fingerprint)
            .ok_or(PtabError::UnknownTable(id))
    }

    /// Instantiates every registered table against a worker's bus handle.
    pub fn create_all(&self, bus: &Arc<dyn MessageBus>) -> HashMap<TableId, Arc<dyn Table>> {
        self.specs
            .values()
            .map(|spec| (spec.id, (spec.factory)(Arc::clone(bus))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{ModSharding, Sum};
    use ptab_common::{FixedMarshal, LocalBus};

    fn descriptor(id: u32) -> TableDescriptor<u32, i64> {
        TableDescriptor::new(TableId(id), 4, FixedMarshal, FixedMarshal, ModSharding, Sum)
    }

    #[test]
    fn register_and_instantiate() {
        let mut registry = TableRegistry::new();
        registry.register(descriptor(0)).unwrap();
        registry.register(descriptor(1)).unwrap();

        assert_eq!(registry.ids(), vec![TableId(0), TableId(1)]);
        assert_eq!(registry.num_shards(TableId(1)).unwrap(), 4);

        let fleet = LocalBus::fleet(1);
        let bus: Arc<dyn MessageBus> = Arc::new(fleet[0].clone());
        let tables = registry.create_all(&bus);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[&TableId(0)].num_shards(), 4);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = TableRegistry::new();
        registry.register(descriptor(7)).unwrap();
        assert!(registry.register(descriptor(7)).is_err());
    }

    #[test]
    fn unknown_table_is_an_error() {
        let registry = TableRegistry::new();
        assert!(matches!(
            registry.num_shards(TableId(9)),
            Err(PtabError::UnknownTable(TableId(9)))
        ));
    }
}

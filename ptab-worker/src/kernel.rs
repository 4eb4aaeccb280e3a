//! # Kernel Harness
//!
//! User methods are plain functions over a `KernelContext`, registered at
//! startup under (kernel name, method name). The master transmits the
//! names as strings in RUN_KERNEL; the worker's kernel thread resolves and
//! invokes them once per assigned shard.

use std::sync::Arc;

use hashbrown::HashMap;

use ptab_common::{ParamMap, PtabError, PtabResult, Rank, ShardId, TableId};
use ptab_table::{GlobalTable, Table, TableKey, TableValue};

/// Everything a kernel method can see: its shard binding, the iteration
/// parameters, and typed access to the registered tables.
pub struct KernelContext<'a> {
    rank: Rank,
    current_shard: ShardId,
    params: &'a ParamMap,
    tables: &'a HashMap<TableId, Arc<dyn Table>>,
}

impl<'a> KernelContext<'a> {
    pub fn new(
        rank: Rank,
        current_shard: ShardId,
        params: &'a ParamMap,
        tables: &'a HashMap<TableId, Arc<dyn Table>>,
    ) -> Self {
        KernelContext {
            rank,
            current_shard,
            params,
            tables,
        }
    }

    /// The worker rank executing this call.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// The shard this invocation is bound to.
    pub fn current_shard(&self) -> ShardId {
        self.current_shard
    }

    /// Parameters from the run descriptor (iteration counter, knobs).
    pub fn params(&self) -> &ParamMap {
        self.params
    }

    /// Recovers the typed handle for a registered table.
    ///
    /// Fails `UnknownTable` for unregistered ids and `TableTypeMismatch`
    /// when `K`/`V` differ from the registration.
    pub fn table<K: TableKey, V: TableValue>(
        &self,
        id: TableId,
    ) -> PtabResult<Arc<GlobalTable<K, V>>> {
        let table = self
            .tables
            .get(&id)
            .ok_or(PtabError::UnknownTable(id))?;
        Arc::clone(table)
            .as_any()
            .downcast::<GlobalTable<K, V>>()
            .map_err(|_| PtabError::TableTypeMismatch(id))
    }
}

type KernelFn = Arc<dyn Fn(&mut KernelContext<'_>) -> PtabResult<()> + Send + Sync>;

/// Catalog mapping (kernel, method) names to invocable functions.
///
/// Populated at startup, read-only afterwards.
#[derive(Default)]
pub struct KernelRegistry {
    methods: HashMap<(String, String), KernelFn>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method under the names the master will dispatch with.
    /// Re-registering a name pair replaces the previous function.
    pub fn register<F>(&mut self, kernel: &str, method: &str, function: F)
    where
        F: Fn(&mut KernelContext<'_>) -> PtabResult<()> + Send + Sync + 'static,
    {
        self.methods
            .insert((kernel.to_owned(), method.to_owned()), Arc::new(function));
    }

    pub fn lookup(&self, kernel: &str, method: &str) -> PtabResult<KernelFn> {
        self.methods
            .get(&(kernel.to_owned(), method.to_owned()))
            .cloned()
            .ok_or_else(|| PtabError::UnknownKernel {
                kernel: kernel.to_owned(),
                method: method.to_owned(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptab_common::{FixedMarshal, LocalBus, MessageBus};
    use ptab_table::{ModSharding, Sum, TableDescriptor, TableRegistry};

    #[test]
    fn register_and_lookup() {
        let mut registry = KernelRegistry::new();
        registry.register("Ranker", "iterate", |_ctx| Ok(()));

        assert!(registry.lookup("Ranker", "iterate").is_ok());
        assert!(matches!(
            registry.lookup("Ranker", "missing"),
            Err(PtabError::UnknownKernel { .. })
        ));
    }

    #[test]
    fn context_resolves_typed_tables() {
        let mut tables_registry = TableRegistry::new();
        tables_registry
            .register(TableDescriptor::<u32, i64>::new(
                TableId(0),
                2,
                FixedMarshal,
                FixedMarshal,
                ModSharding,
                Sum,
            ))
            .unwrap();

        let fleet = LocalBus::fleet(1);
        let bus: Arc<dyn MessageBus> = Arc::new(fleet[0].clone());
        let tables = tables_registry.create_all(&bus);

        let params = ParamMap::new();
        let ctx = KernelContext::new(0, 1, &params, &tables);

        assert_eq!(ctx.current_shard(), 1);
        assert!(ctx.table::<u32, i64>(TableId(0)).is_ok());
        assert!(matches!(
            ctx.table::<u32, f32>(TableId(0)),
            Err(PtabError::TableTypeMismatch(TableId(0)))
        ));
        assert!(matches!(
            ctx.table::<u32, i64>(TableId(9)),
            Err(PtabError::UnknownTable(TableId(9)))
        ));
    }
}

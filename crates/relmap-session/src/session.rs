//! The session: per-type tables and dependency-ordered commit.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use relmap_core::{Entity, EntityLink, Error, Provider, Result};

use crate::intercept::SessionExecutor;
use crate::table::{Table, TableCore, TableOps};
use crate::topo;
use crate::tracked::{SubmitAction, TrackedItem};

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether materialized entities are interned and tracked.
    ///
    /// With tracking off, queries stream rows through uninterned and
    /// mutation APIs fail with `TrackingDisabled`; useful for read-only
    /// sessions.
    pub object_tracking: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            object_tracking: true,
        }
    }
}

struct TableSlot {
    ops: Rc<dyn TableOps>,
    any: Rc<dyn Any>,
}

/// A unit of work over a query provider.
///
/// The session hands out per-entity-type [`Table`]s, intercepts query
/// materialization so every entity is interned before the caller sees it,
/// and flushes accumulated changes as a single transaction in dependency
/// order via [`Session::submit_changes`].
///
/// A session is single-threaded; callers own serialization across
/// concurrent use.
pub struct Session<P: Provider> {
    provider: Rc<P>,
    config: SessionConfig,
    tables: RefCell<HashMap<TypeId, TableSlot>>,
    /// Table registration order; keeps commit collection stable.
    order: RefCell<Vec<TypeId>>,
}

impl<P: Provider> Session<P> {
    /// Create a session over a provider.
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, SessionConfig::default())
    }

    /// Create a session with custom configuration.
    pub fn with_config(provider: P, config: SessionConfig) -> Self {
        Self {
            provider: Rc::new(provider),
            config,
            tables: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
        }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create an intercepting executor over a fresh provider executor.
    pub fn executor(&self) -> SessionExecutor<P::Executor> {
        SessionExecutor::new(self.provider.create_executor())
    }

    /// Get the session table for an entity type, creating it on first use.
    pub fn table<M: Entity>(&self) -> Table<M, P::Store<M>> {
        let tid = TypeId::of::<M>();
        if let Some(slot) = self.tables.borrow().get(&tid) {
            let core = Rc::clone(&slot.any)
                .downcast::<TableCore<M, P::Store<M>>>()
                .expect("table registered under this type with a different store");
            return Table::from_core(core);
        }

        tracing::debug!(table = M::TABLE, "creating session table");
        let core = TableCore::new(self.provider.store::<M>(), self.config.object_tracking);
        let slot = TableSlot {
            ops: Rc::clone(&core) as Rc<dyn TableOps>,
            any: Rc::clone(&core) as Rc<dyn Any>,
        };
        self.tables.borrow_mut().insert(tid, slot);
        self.order.borrow_mut().push(tid);
        Table::from_core(core)
    }

    /// Preview of pending changes by effective action.
    pub fn change_set(&self) -> ChangeSet {
        let tables = self.tables.borrow();
        let mut set = ChangeSet::default();
        for tid in self.order.borrow().iter() {
            let slot = &tables[tid];
            for item in slot.ops.tracked_items() {
                match slot.ops.effective_action(&item) {
                    SubmitAction::Insert | SubmitAction::InsertOrUpdate => {
                        set.inserts.push(item.entity().clone());
                    }
                    SubmitAction::Update => set.updates.push(item.entity().clone()),
                    SubmitAction::Delete => set.deletes.push(item.entity().clone()),
                    SubmitAction::PossibleUpdate | SubmitAction::None => {}
                }
            }
        }
        set
    }

    /// Whether commit would issue any CRUD call.
    pub fn has_changes(&self) -> bool {
        !self.change_set().is_empty()
    }

    /// Number of CRUD calls commit would issue.
    pub fn pending_count(&self) -> usize {
        self.change_set().len()
    }

    /// Flush all pending changes to the store as one transaction.
    ///
    /// Items commit in dependency order: an insert's dependencies (and the
    /// delete vacating its key) go first, a delete's dependents go first.
    /// Post-commit state transitions (`accept`) run only after the
    /// transaction completes, in the same order; any failure inside the
    /// transaction rolls back and leaves tracked state untouched.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn submit_changes(&self) -> Result<()> {
        if !self.config.object_tracking {
            return Err(Error::TrackingDisabled);
        }

        let mut submitted: Vec<(Rc<dyn TableOps>, TrackedItem)> = Vec::new();
        let mut work = || -> Result<()> {
            // A provider may retry the transaction body; start clean.
            submitted.clear();
            let plan = self.commit_plan()?;
            tracing::debug!(pending = plan.len(), "submitting in dependency order");
            for (ops, item) in plan {
                if ops.submit(&item)? {
                    submitted.push((ops, item));
                }
            }
            Ok(())
        };
        self.provider.transacted(&mut work)?;

        for (ops, item) in &submitted {
            ops.accept(item)?;
        }
        tracing::debug!(accepted = submitted.len(), "changes committed");
        Ok(())
    }

    /// Collect pending items and order them for commit.
    fn commit_plan(&self) -> Result<Vec<(Rc<dyn TableOps>, TrackedItem)>> {
        let mut entries: Vec<(Rc<dyn TableOps>, TrackedItem)> = Vec::new();
        {
            let tables = self.tables.borrow();
            for tid in self.order.borrow().iter() {
                let slot = &tables[tid];
                for item in slot.ops.tracked_items() {
                    if item.state().is_pending() {
                        entries.push((Rc::clone(&slot.ops), item));
                    }
                }
            }
        }

        let index: HashMap<usize, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, (_, item))| (item.instance_id(), i))
            .collect();

        // The dependency relation, collected from both enumeration
        // directions and deduplicated by instance-identity pairs.
        // requires[i] holds what item i depends on; required_by[j] holds
        // who depends on item j.
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut requires: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        let mut required_by: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];

        for (i, (ops, item)) in entries.iter().enumerate() {
            let (depending, dependents) = ops.dependencies(item);
            for link in depending {
                if let Some(&j) = index.get(&link.instance_id()) {
                    if i != j && seen.insert((i, j)) {
                        requires[i].push(j);
                        required_by[j].push(i);
                    }
                }
            }
            for link in dependents {
                if let Some(&j) = index.get(&link.instance_id()) {
                    if i != j && seen.insert((j, i)) {
                        requires[j].push(i);
                        required_by[i].push(j);
                    }
                }
            }
        }

        let order = topo::sort_stable(entries.len(), |i| {
            let (ops, item) = &entries[i];
            if item.state().is_insert_like() {
                // Dependencies first, and the delete vacating this key (if
                // any) before the insert reusing it.
                let mut preds = requires[i].clone();
                if let Some(delete) = ops.pending_delete_for_key(item) {
                    if let Some(&j) = index.get(&delete.instance_id()) {
                        preds.push(j);
                    }
                }
                preds
            } else if item.state() == SubmitAction::Delete {
                // Dependents first.
                required_by[i].clone()
            } else {
                Vec::new()
            }
        })
        .map_err(|cycle| Error::CycleDetected {
            tables: cycle
                .members
                .iter()
                .map(|&i| entries[i].0.descriptor().table())
                .collect(),
        })?;

        Ok(order.into_iter().map(|i| entries[i].clone()).collect())
    }
}

/// Pending changes grouped by effective action.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Instances pending insert or upsert.
    pub inserts: Vec<EntityLink>,
    /// Instances whose update would be emitted.
    pub updates: Vec<EntityLink>,
    /// Instances pending delete.
    pub deletes: Vec<EntityLink>,
}

impl ChangeSet {
    /// Total pending CRUD calls.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Whether nothing would be committed.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{
        new_entity, Command, EntitySeq, EntityStore, Executor, Projector, Row, Value,
    };
    use serde::Serialize;
    use std::marker::PhantomData;

    #[derive(Serialize)]
    struct Thing {
        id: i64,
    }

    impl Entity for Thing {
        const TABLE: &'static str = "things";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn primary_key(&self) -> Vec<Value> {
            vec![Value::BigInt(self.id)]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
            })
        }
    }

    struct NullStore<M>(PhantomData<M>);

    impl<M: Entity> EntityStore<M> for NullStore<M> {
        fn insert(&self, _row: &M) -> Result<()> {
            Ok(())
        }

        fn update(&self, _row: &M) -> Result<()> {
            Ok(())
        }

        fn insert_or_update(&self, _row: &M) -> Result<()> {
            Ok(())
        }

        fn delete(&self, _row: &M) -> Result<()> {
            Ok(())
        }

        fn get_by_id(&self, _key: &[Value]) -> Result<Option<M>> {
            Ok(None)
        }
    }

    struct NullExecutor;

    impl Executor for NullExecutor {
        fn execute<T: 'static>(
            &mut self,
            _command: &Command,
            _projector: Projector<T>,
        ) -> Result<EntitySeq<T>> {
            Ok(EntitySeq::empty())
        }

        fn execute_command(&mut self, _command: &Command) -> Result<u64> {
            Ok(0)
        }
    }

    struct NullProvider;

    impl Provider for NullProvider {
        type Store<M: Entity> = NullStore<M>;
        type Executor = NullExecutor;

        fn store<M: Entity>(&self) -> NullStore<M> {
            NullStore(PhantomData)
        }

        fn create_executor(&self) -> NullExecutor {
            NullExecutor
        }

        fn transacted(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
            work()
        }
    }

    #[test]
    fn config_defaults_to_tracking() {
        assert!(SessionConfig::default().object_tracking);
    }

    #[test]
    fn provider_port_defaults() {
        let provider = NullProvider;
        let cmd = Command::new("select 1");
        assert_eq!(provider.query_text(&cmd), "select 1");
        assert!(!provider.can_evaluate_locally(&cmd));
    }

    #[test]
    fn table_is_created_once() {
        let session = Session::new(NullProvider);
        let a = session.table::<Thing>();
        let b = session.table::<Thing>();

        let row = a.on_materialized(Thing { id: 1 }).unwrap();
        // Both handles share the same identity cache.
        assert!(b.cached(&[Value::BigInt(1)]).is_some());
        assert_eq!(b.get_submit_action(&row), SubmitAction::None);
    }

    #[test]
    fn empty_session_has_no_changes() {
        let session = Session::new(NullProvider);
        session.table::<Thing>();
        assert!(!session.has_changes());
        assert_eq!(session.pending_count(), 0);
        session.submit_changes().unwrap();
    }

    #[test]
    fn tracking_disabled_blocks_submit() {
        let session = Session::with_config(
            NullProvider,
            SessionConfig {
                object_tracking: false,
            },
        );
        let err = session.submit_changes().unwrap_err();
        assert!(matches!(err, Error::TrackingDisabled));
    }

    #[test]
    fn change_set_reports_effective_actions() {
        let session = Session::new(NullProvider);
        let table = session.table::<Thing>();

        let a = new_entity(Thing { id: 1 });
        let b = new_entity(Thing { id: 2 });
        table.set_submit_action(&a, SubmitAction::Insert).unwrap();
        table.set_submit_action(&b, SubmitAction::Delete).unwrap();

        // An unmodified PossibleUpdate contributes nothing.
        let c = new_entity(Thing { id: 3 });
        table
            .set_submit_action(&c, SubmitAction::PossibleUpdate)
            .unwrap();

        let set = session.change_set();
        assert_eq!(set.inserts.len(), 1);
        assert_eq!(set.deletes.len(), 1);
        assert_eq!(set.updates.len(), 0);
        assert_eq!(set.len(), 2);
        assert!(session.has_changes());
    }
}

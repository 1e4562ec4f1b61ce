//! Per-entity-type session table: identity map and change tracker.
//!
//! A [`Table`] owns the identity cache (key -> canonical instance) and the
//! tracked-item map (instance identity -> pending change) for one entity
//! type. It implements the materialization hook that interns every row a
//! query produces, and the submit/accept state machine the session drives
//! at commit time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use relmap_core::{
    new_entity, ChangeSignal, Entity, EntityDescriptor, EntityKey, EntityLink, EntityRef,
    EntityStore, Error, Result, Value,
};

use crate::tracked::{Original, SubmitAction, TrackedItem};

/// Identity of an instance behind a shared handle.
fn ref_id<M>(entity: &EntityRef<M>) -> usize {
    Rc::as_ptr(entity) as *const () as usize
}

/// Erased capability set the session uses to drive any table.
pub(crate) trait TableOps {
    fn descriptor(&self) -> EntityDescriptor;
    fn tracked_items(&self) -> Vec<TrackedItem>;
    fn effective_action(&self, item: &TrackedItem) -> SubmitAction;
    fn dependencies(&self, item: &TrackedItem) -> (Vec<EntityLink>, Vec<EntityLink>);
    fn pending_delete_for_key(&self, item: &TrackedItem) -> Option<TrackedItem>;
    fn submit(&self, item: &TrackedItem) -> Result<bool>;
    fn accept(&self, item: &TrackedItem) -> Result<()>;
}

struct TableState<M> {
    /// key -> canonical instance. Keys are unique; the cached instance is
    /// authoritative for its key.
    cache: HashMap<EntityKey, EntityRef<M>>,
    /// Tracked items in first-tracked order.
    items: Vec<TrackedItem>,
    /// instance identity -> index into `items`.
    index: HashMap<usize, usize>,
}

impl<M> Default for TableState<M> {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

pub(crate) struct TableCore<M: Entity, S: EntityStore<M>> {
    store: S,
    tracking: bool,
    self_weak: Weak<TableCore<M, S>>,
    state: RefCell<TableState<M>>,
}

impl<M: Entity, S: EntityStore<M> + 'static> TableCore<M, S> {
    pub(crate) fn new(store: S, tracking: bool) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            store,
            tracking,
            self_weak: weak.clone(),
            state: RefCell::new(TableState::default()),
        })
    }

    fn key_of(&self, instance: &M) -> Option<EntityKey> {
        EntityKey::from_values(&instance.primary_key())
    }

    fn instance_of(&self, item: &TrackedItem) -> EntityRef<M> {
        item.entity()
            .downcast::<M>()
            .expect("tracked item routed to a table of a different entity type")
    }

    fn get_tracked(&self, id: usize) -> Option<TrackedItem> {
        let state = self.state.borrow();
        state.index.get(&id).map(|&idx| state.items[idx].clone())
    }

    /// Insert or replace the record for the item's instance. Replacement
    /// keeps the item's position, so commit collection stays stable.
    fn store_item(&self, item: TrackedItem) {
        let mut state = self.state.borrow_mut();
        let id = item.instance_id();
        match state.index.get(&id).copied() {
            Some(idx) => state.items[idx] = item,
            None => {
                let idx = state.items.len();
                state.items.push(item);
                state.index.insert(id, idx);
            }
        }
    }

    fn remove_item(&self, id: usize) {
        let mut state = self.state.borrow_mut();
        if let Some(idx) = state.index.remove(&id) {
            state.items.remove(idx);
            state.index = state
                .items
                .iter()
                .enumerate()
                .map(|(i, it)| (it.instance_id(), i))
                .collect();
        }
    }

    /// Compare the instance's current serialization against a snapshot.
    /// A failing serialization counts as modified.
    fn differs(&self, entity: &EntityRef<M>, original: &[u8]) -> bool {
        serde_json::to_vec(&*entity.borrow()).unwrap_or_default() != original
    }

    fn subscribe_changing(&self, entity: &EntityRef<M>, signal: &ChangeSignal) {
        let weak_table = self.self_weak.clone();
        let weak_entity = Rc::downgrade(entity);
        signal.subscribe(move || {
            if let (Some(table), Some(entity)) = (weak_table.upgrade(), weak_entity.upgrade()) {
                table.handle_changing(&entity);
            }
        });
    }

    /// Establish `PossibleUpdate` tracking for the instance: subscribe to
    /// its change signal when it has one, take a snapshot otherwise.
    fn begin_possible_update(&self, base: TrackedItem, entity: &EntityRef<M>) -> Result<TrackedItem> {
        let guard = entity.borrow();
        if let Some(signal) = guard.changing() {
            if !base.subscribed() {
                self.subscribe_changing(entity, signal);
            }
            Ok(base.with_original(Original::Absent).with_subscribed(true))
        } else {
            let bytes = serde_json::to_vec(&*guard)?;
            Ok(base
                .with_original(Original::snapshot(bytes))
                .with_subscribed(false))
        }
    }

    /// About-to-change handler for subscribed instances: capture the
    /// pre-change state as the original and upgrade to `Update`. Later
    /// signals find the state is no longer `PossibleUpdate` and do nothing.
    fn handle_changing(&self, entity: &EntityRef<M>) {
        let Some(item) = self.get_tracked(ref_id(entity)) else {
            return;
        };
        if item.state() != SubmitAction::PossibleUpdate {
            return;
        }
        let bytes = serde_json::to_vec(&*entity.borrow()).unwrap_or_default();
        tracing::trace!(
            table = M::TABLE,
            snapshot_bytes = bytes.len(),
            "change signal raised, upgrading to Update"
        );
        self.store_item(
            item.with_state(SubmitAction::Update)
                .with_original(Original::snapshot(bytes)),
        );
    }

    /// Make the instance the cached holder of its key, or verify it
    /// already is.
    ///
    /// A different holder fails with `IdentityConflict`, unless that
    /// holder is pending `Delete`: key reuse across delete+insert is a
    /// permitted transient state, and `accept` repairs the cache in commit
    /// order. Unkeyed instances stay uncached until accepted.
    fn ensure_cached(&self, entity: &EntityRef<M>) -> Result<()> {
        let Some(key) = self.key_of(&entity.borrow()) else {
            return Ok(());
        };
        let mut state = self.state.borrow_mut();
        let cached = state.cache.get(&key).cloned();
        match cached {
            None => {
                state.cache.insert(key, Rc::clone(entity));
                Ok(())
            }
            Some(holder) if Rc::ptr_eq(&holder, entity) => Ok(()),
            Some(holder) => {
                let holder_state = state
                    .index
                    .get(&ref_id(&holder))
                    .map(|&idx| state.items[idx].state());
                if holder_state == Some(SubmitAction::Delete) {
                    Ok(())
                } else {
                    Err(Error::IdentityConflict {
                        table: M::TABLE,
                        key,
                    })
                }
            }
        }
    }

    /// Intern a freshly materialized instance.
    ///
    /// Returns the cached instance when the key is already present (the
    /// duplicate is discarded); otherwise caches this instance and tracks
    /// it as `PossibleUpdate`. The returned handle is what downstream
    /// consumers see.
    pub(crate) fn on_materialized(&self, instance: M) -> Result<EntityRef<M>> {
        if !self.tracking {
            return Ok(new_entity(instance));
        }

        let key = self.key_of(&instance);
        if let Some(key) = key {
            let cached = self.state.borrow().cache.get(&key).cloned();
            if let Some(existing) = cached {
                tracing::trace!(table = M::TABLE, key = %key, "interned to cached instance");
                return Ok(existing);
            }
        }

        let entity = new_entity(instance);
        if let Some(key) = key {
            self.state
                .borrow_mut()
                .cache
                .insert(key, Rc::clone(&entity));
        }
        let base = TrackedItem::new(EntityLink::new(&entity), SubmitAction::PossibleUpdate);
        let item = self.begin_possible_update(base, &entity)?;
        self.store_item(item);
        Ok(entity)
    }

    pub(crate) fn get_by_id(&self, key: &[Value]) -> Result<Option<EntityRef<M>>> {
        // Always hits the store; interning afterwards still hands back the
        // canonical instance when the row was already tracked.
        match self.store.get_by_id(key)? {
            Some(instance) => Ok(Some(self.on_materialized(instance)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn set_submit_action(
        &self,
        entity: &EntityRef<M>,
        action: SubmitAction,
    ) -> Result<()> {
        if !self.tracking {
            return Err(Error::TrackingDisabled);
        }
        self.ensure_cached(entity)?;

        let existing = self.get_tracked(ref_id(entity));
        let item = match action {
            SubmitAction::PossibleUpdate => {
                let base = existing
                    .unwrap_or_else(|| TrackedItem::new(EntityLink::new(entity), action))
                    .with_state(action);
                self.begin_possible_update(base, entity)?
            }
            // Other actions preserve any captured original and the
            // subscription flag.
            other => match existing {
                Some(prev) => prev.with_state(other),
                None => TrackedItem::new(EntityLink::new(entity), other),
            },
        };
        tracing::trace!(table = M::TABLE, action = ?item.state(), "submit action assigned");
        self.store_item(item);
        Ok(())
    }

    pub(crate) fn get_submit_action(&self, entity: &EntityRef<M>) -> SubmitAction {
        match self.get_tracked(ref_id(entity)) {
            Some(item) => item.effective_action(|original| self.differs(entity, original)),
            None => SubmitAction::None,
        }
    }

    /// Intern an existing row as `PossibleUpdate`, failing if a different
    /// instance already holds its key.
    pub(crate) fn attach(&self, instance: M) -> Result<EntityRef<M>> {
        if !self.tracking {
            return Err(Error::TrackingDisabled);
        }
        if let Some(key) = self.key_of(&instance) {
            if self.state.borrow().cache.contains_key(&key) {
                return Err(Error::IdentityConflict {
                    table: M::TABLE,
                    key,
                });
            }
        }
        self.on_materialized(instance)
    }

    /// Probe the identity cache. Only tracked instances appear here.
    pub(crate) fn cached(&self, key: &[Value]) -> Option<EntityRef<M>> {
        let key = EntityKey::from_values(key)?;
        self.state.borrow().cache.get(&key).cloned()
    }

    pub(crate) fn tracked_len(&self) -> usize {
        self.state.borrow().items.len()
    }

    /// Translate an item's state to a CRUD call on the underlying store.
    /// Returns whether a call was made, so the session knows to `accept`.
    fn submit_item(&self, item: &TrackedItem) -> Result<bool> {
        let entity = self.instance_of(item);
        match item.state() {
            SubmitAction::Delete => {
                self.store.delete(&entity.borrow())?;
                Ok(true)
            }
            SubmitAction::Insert => {
                self.store.insert(&entity.borrow())?;
                Ok(true)
            }
            SubmitAction::InsertOrUpdate => {
                self.store.insert_or_update(&entity.borrow())?;
                Ok(true)
            }
            SubmitAction::Update => {
                self.store.update(&entity.borrow())?;
                Ok(true)
            }
            SubmitAction::PossibleUpdate => {
                if item.effective_action(|original| self.differs(&entity, original))
                    == SubmitAction::Update
                {
                    self.store.update(&entity.borrow())?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            SubmitAction::None => Ok(false),
        }
    }

    /// Post-commit transition for a submitted item.
    fn accept_item(&self, item: &TrackedItem) -> Result<()> {
        let entity = self.instance_of(item);
        match item.state() {
            SubmitAction::Delete => {
                if let Some(key) = self.key_of(&entity.borrow()) {
                    let mut state = self.state.borrow_mut();
                    let holds = state
                        .cache
                        .get(&key)
                        .is_some_and(|cached| Rc::ptr_eq(cached, &entity));
                    if holds {
                        state.cache.remove(&key);
                    }
                }
                self.remove_item(item.instance_id());
                // Release the outward reference from the instance back
                // into this table.
                if item.subscribed() {
                    if let Some(signal) = entity.borrow().changing() {
                        signal.clear();
                    }
                }
                Ok(())
            }
            SubmitAction::Insert | SubmitAction::InsertOrUpdate => {
                if let Some(key) = self.key_of(&entity.borrow()) {
                    self.state
                        .borrow_mut()
                        .cache
                        .insert(key, Rc::clone(&entity));
                }
                let next =
                    self.begin_possible_update(item.with_state(SubmitAction::PossibleUpdate), &entity)?;
                self.store_item(next);
                Ok(())
            }
            SubmitAction::Update | SubmitAction::PossibleUpdate => {
                let next =
                    self.begin_possible_update(item.with_state(SubmitAction::PossibleUpdate), &entity)?;
                self.store_item(next);
                Ok(())
            }
            SubmitAction::None => Ok(()),
        }
    }
}

impl<M: Entity, S: EntityStore<M> + 'static> TableOps for TableCore<M, S> {
    fn descriptor(&self) -> EntityDescriptor {
        EntityDescriptor::of::<M>()
    }

    fn tracked_items(&self) -> Vec<TrackedItem> {
        self.state.borrow().items.clone()
    }

    fn effective_action(&self, item: &TrackedItem) -> SubmitAction {
        let entity = self.instance_of(item);
        item.effective_action(|original| self.differs(&entity, original))
    }

    fn dependencies(&self, item: &TrackedItem) -> (Vec<EntityLink>, Vec<EntityLink>) {
        let entity = self.instance_of(item);
        let guard = entity.borrow();
        (guard.depending(), guard.dependents())
    }

    fn pending_delete_for_key(&self, item: &TrackedItem) -> Option<TrackedItem> {
        let entity = self.instance_of(item);
        let key = self.key_of(&entity.borrow())?;
        let state = self.state.borrow();
        let holder = state.cache.get(&key)?;
        if Rc::ptr_eq(holder, &entity) {
            return None;
        }
        let idx = *state.index.get(&ref_id(holder))?;
        let candidate = &state.items[idx];
        (candidate.state() == SubmitAction::Delete).then(|| candidate.clone())
    }

    fn submit(&self, item: &TrackedItem) -> Result<bool> {
        self.submit_item(item)
    }

    fn accept(&self, item: &TrackedItem) -> Result<()> {
        self.accept_item(item)
    }
}

/// Cheap-clone handle to a session table for one entity type.
///
/// Obtained from `Session::table`; queries routed through the session's
/// executor intern every materialized row into this table before the
/// caller sees it.
pub struct Table<M: Entity, S: EntityStore<M>> {
    pub(crate) core: Rc<TableCore<M, S>>,
}

impl<M: Entity, S: EntityStore<M>> Clone for Table<M, S> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<M: Entity, S: EntityStore<M> + 'static> Table<M, S> {
    pub(crate) fn from_core(core: Rc<TableCore<M, S>>) -> Self {
        Self { core }
    }

    /// Fetch by primary key from the underlying store.
    ///
    /// The store is always consulted; the materialized row is interned, so
    /// a row that was already tracked comes back as its canonical
    /// instance.
    pub fn get_by_id(&self, key: &[Value]) -> Result<Option<EntityRef<M>>> {
        self.core.get_by_id(key)
    }

    /// Assign the pending action for an instance.
    pub fn set_submit_action(&self, entity: &EntityRef<M>, action: SubmitAction) -> Result<()> {
        self.core.set_submit_action(entity, action)
    }

    /// The action commit would take for an instance. Untracked instances
    /// report `None`; `PossibleUpdate` resolves against the modification
    /// check.
    pub fn get_submit_action(&self, entity: &EntityRef<M>) -> SubmitAction {
        self.core.get_submit_action(entity)
    }

    /// Route a materialized instance through the identity map.
    pub fn on_materialized(&self, instance: M) -> Result<EntityRef<M>> {
        self.core.on_materialized(instance)
    }

    /// Track an existing row as `PossibleUpdate`. Fails with
    /// `IdentityConflict` if its key is already cached.
    pub fn attach(&self, instance: M) -> Result<EntityRef<M>> {
        self.core.attach(instance)
    }

    /// Probe the identity cache by primary key values.
    pub fn cached(&self, key: &[Value]) -> Option<EntityRef<M>> {
        self.core.cached(key)
    }

    /// Number of tracked instances.
    pub fn tracked_len(&self) -> usize {
        self.core.tracked_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{modify, Row};
    use serde::Serialize;
    use std::marker::PhantomData;

    #[derive(Debug, Serialize)]
    struct Plain {
        id: Option<i64>,
        name: String,
    }

    impl Entity for Plain {
        const TABLE: &'static str = "plain";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn primary_key(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                name: row.get_named("name")?,
            })
        }
    }

    #[derive(Serialize)]
    struct Signalled {
        id: Option<i64>,
        name: String,
        #[serde(skip)]
        changing: ChangeSignal,
    }

    impl Entity for Signalled {
        const TABLE: &'static str = "signalled";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn primary_key(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                name: row.get_named("name")?,
                changing: ChangeSignal::new(),
            })
        }

        fn changing(&self) -> Option<&ChangeSignal> {
            Some(&self.changing)
        }
    }

    struct NullStore<M>(PhantomData<M>);

    impl<M> NullStore<M> {
        fn new() -> Self {
            Self(PhantomData)
        }
    }

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

    fn plain_table() -> Table<Plain, NullStore<Plain>> {
        Table::from_core(TableCore::new(NullStore::new(), true))
    }

    fn plain(id: Option<i64>, name: &str) -> Plain {
        Plain {
            id,
            name: name.into(),
        }
    }

    #[test]
    fn interning_is_idempotent() {
        let table = plain_table();
        let first = table.on_materialized(plain(Some(1), "a")).unwrap();
        let second = table.on_materialized(plain(Some(1), "stale copy")).unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.borrow().name, "a");
        assert_eq!(table.tracked_len(), 1);
    }

    #[test]
    fn materialized_rows_start_unmodified() {
        let table = plain_table();
        let row = table.on_materialized(plain(Some(1), "a")).unwrap();
        assert_eq!(table.get_submit_action(&row), SubmitAction::None);
    }

    #[test]
    fn snapshot_strategy_detects_mutation() {
        let table = plain_table();
        let row = table.on_materialized(plain(Some(1), "a")).unwrap();

        row.borrow_mut().name = "b".into();
        assert_eq!(table.get_submit_action(&row), SubmitAction::Update);
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let table = plain_table();
        let row = table.on_materialized(plain(Some(1), "a")).unwrap();
        let before = table.core.get_tracked(ref_id(&row)).unwrap();

        row.borrow_mut().name = "b".into();
        let after = table.core.get_tracked(ref_id(&row)).unwrap();
        assert_eq!(before.original().as_bytes(), after.original().as_bytes());
    }

    #[test]
    fn different_instance_same_key_is_rejected() {
        let table = plain_table();
        let a = new_entity(plain(Some(1), "a"));
        let b = new_entity(plain(Some(1), "b"));

        table.set_submit_action(&a, SubmitAction::PossibleUpdate).unwrap();
        let err = table
            .set_submit_action(&b, SubmitAction::Update)
            .unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { table: "plain", .. }));
        // Nothing was tracked for the rejected instance.
        assert_eq!(table.get_submit_action(&b), SubmitAction::None);
    }

    #[test]
    fn key_held_by_pending_delete_admits_new_instance() {
        let table = plain_table();
        let doomed = new_entity(plain(Some(1), "old"));
        let fresh = new_entity(plain(Some(1), "new"));

        table.set_submit_action(&doomed, SubmitAction::Delete).unwrap();
        table.set_submit_action(&fresh, SubmitAction::Insert).unwrap();

        // The delete still holds the cache slot until accepted.
        let cached = table.cached(&[Value::BigInt(1)]).unwrap();
        assert!(Rc::ptr_eq(&cached, &doomed));
    }

    #[test]
    fn unkeyed_inserts_do_not_collide() {
        let table = plain_table();
        let a = new_entity(plain(None, "a"));
        let b = new_entity(plain(None, "b"));

        table.set_submit_action(&a, SubmitAction::Insert).unwrap();
        table.set_submit_action(&b, SubmitAction::Insert).unwrap();
        assert_eq!(table.tracked_len(), 2);
    }

    #[test]
    fn attach_conflicts_on_cached_key() {
        let table = plain_table();
        table.on_materialized(plain(Some(1), "a")).unwrap();
        let err = table.attach(plain(Some(1), "b")).unwrap_err();
        assert!(matches!(err, Error::IdentityConflict { .. }));
    }

    #[test]
    fn signal_upgrade_captures_pre_change_original() {
        let table = Table::from_core(TableCore::<Signalled, NullStore<Signalled>>::new(
            NullStore::new(),
            true,
        ));
        let row = table
            .on_materialized(Signalled {
                id: Some(1),
                name: "before".into(),
                changing: ChangeSignal::new(),
            })
            .unwrap();

        let tracked = table.core.get_tracked(ref_id(&row)).unwrap();
        assert!(tracked.subscribed());
        assert!(tracked.original().is_absent());

        modify(&row, |m| m.name = "after".into());

        let upgraded = table.core.get_tracked(ref_id(&row)).unwrap();
        assert_eq!(upgraded.state(), SubmitAction::Update);
        let original = upgraded.original().as_bytes().unwrap();
        assert!(std::str::from_utf8(original).unwrap().contains("before"));

        // Only the first signal captures; the original is not retaken.
        modify(&row, |m| m.name = "later".into());
        let unchanged = table.core.get_tracked(ref_id(&row)).unwrap();
        assert!(std::str::from_utf8(unchanged.original().as_bytes().unwrap())
            .unwrap()
            .contains("before"));
    }

    #[test]
    fn tracking_disabled_passes_rows_through() {
        let table: Table<Plain, NullStore<Plain>> =
            Table::from_core(TableCore::new(NullStore::new(), false));
        let first = table.on_materialized(plain(Some(1), "a")).unwrap();
        let second = table.on_materialized(plain(Some(1), "a")).unwrap();

        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(table.tracked_len(), 0);
        let err = table
            .set_submit_action(&first, SubmitAction::Insert)
            .unwrap_err();
        assert!(matches!(err, Error::TrackingDisabled));
    }
}

//! The mapping port: entity metadata, keys, and shared instance handles.
//!
//! Entities are plain structs implementing [`Entity`]. Within a session an
//! instance lives behind an [`EntityRef`] so the identity cache, tracked
//! items, and application code all observe the same object. Instance
//! identity is allocation identity (`Rc::ptr_eq`), never value equality.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::error::Result;
use crate::row::Row;
use crate::signal::ChangeSignal;
use crate::value::{hash_values, Value};

/// A shared, mutable handle to an entity instance.
pub type EntityRef<M> = Rc<RefCell<M>>;

/// Wrap an owned instance into a shared handle.
pub fn new_entity<M>(instance: M) -> EntityRef<M> {
    Rc::new(RefCell::new(instance))
}

/// Trait for types that map to a logical table.
///
/// The session consumes this as its read-only mapping facade: key
/// extraction, row materialization, the optional about-to-change hook, and
/// foreign-relation enumeration. Snapshot cloning and modification checks
/// are derived from the `Serialize` supertrait (serialized state is the
/// snapshot; byte inequality is the modification check).
pub trait Entity: Serialize + Sized + 'static {
    /// The name of the logical table.
    const TABLE: &'static str;

    /// The primary key column name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// Get the value(s) of the primary key field(s).
    fn primary_key(&self) -> Vec<Value>;

    /// Construct an instance from a result row.
    fn from_row(row: &Row) -> Result<Self>;

    /// The about-to-change signal, for entities that raise one.
    ///
    /// Returning `Some` opts the instance into subscription-based change
    /// tracking; the default snapshot strategy applies otherwise.
    fn changing(&self) -> Option<&ChangeSignal> {
        None
    }

    /// Entities this instance depends on (its foreign-key targets).
    fn depending(&self) -> Vec<EntityLink> {
        Vec::new()
    }

    /// Entities that depend on this instance.
    fn dependents(&self) -> Vec<EntityLink> {
        Vec::new()
    }
}

/// Opaque handle identifying a logical table and its entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityDescriptor {
    type_id: TypeId,
    table: &'static str,
}

impl EntityDescriptor {
    /// Resolve the descriptor for an entity type.
    pub fn of<M: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            table: M::TABLE,
        }
    }

    /// The entity type identifier.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The logical table name.
    pub fn table(&self) -> &'static str {
        self.table
    }
}

/// Opaque, hashable entity key derived from primary key values.
///
/// Two instances with equal keys name the same entity within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey(u64);

impl EntityKey {
    /// Derive a key from primary key values.
    ///
    /// Returns `None` for empty or all-`Null` keys: an unsaved row with a
    /// store-generated key is unkeyed until it is accepted.
    pub fn from_values(values: &[Value]) -> Option<Self> {
        if values.is_empty() || values.iter().all(Value::is_null) {
            return None;
        }
        Some(Self(hash_values(values)))
    }

    /// Construct from a raw hash. Intended for diagnostics and tests.
    pub fn from_raw(hash: u64) -> Self {
        Self(hash)
    }

    /// The underlying hash.
    pub fn hash(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// A type-erased reference to an entity instance.
///
/// Carries the descriptor of the owning table and keeps the instance
/// alive; identity comparisons go through [`EntityLink::instance_id`].
#[derive(Clone)]
pub struct EntityLink {
    descriptor: EntityDescriptor,
    handle: Rc<dyn Any>,
}

impl EntityLink {
    /// Erase a typed instance handle.
    pub fn new<M: Entity>(instance: &EntityRef<M>) -> Self {
        Self {
            descriptor: EntityDescriptor::of::<M>(),
            handle: Rc::clone(instance) as Rc<dyn Any>,
        }
    }

    /// Descriptor of the entity's table.
    pub fn descriptor(&self) -> EntityDescriptor {
        self.descriptor
    }

    /// Stable identity of the referenced instance.
    pub fn instance_id(&self) -> usize {
        Rc::as_ptr(&self.handle) as *const () as usize
    }

    /// Recover the typed handle, if `M` matches.
    pub fn downcast<M: Entity>(&self) -> Option<EntityRef<M>> {
        Rc::clone(&self.handle).downcast::<RefCell<M>>().ok()
    }

    /// Whether two links refer to the same instance.
    pub fn same_instance(&self, other: &EntityLink) -> bool {
        self.instance_id() == other.instance_id()
    }
}

impl fmt::Debug for EntityLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLink")
            .field("table", &self.descriptor.table)
            .field("instance", &format_args!("{:#x}", self.instance_id()))
            .finish()
    }
}

/// Mutate an entity through its shared handle, raising the about-to-change
/// signal first so a subscribed session table can capture the pre-change
/// state.
pub fn modify<M: Entity, R>(entity: &EntityRef<M>, f: impl FnOnce(&mut M) -> R) -> R {
    {
        let guard = entity.borrow();
        if let Some(signal) = guard.changing() {
            signal.raise();
        }
    }
    f(&mut entity.borrow_mut())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Widget {
        id: Option<i64>,
        label: String,
    }

    impl Entity for Widget {
        const TABLE: &'static str = "widgets";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn primary_key(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: Some(row.get_named("id")?),
                label: row.get_named("label")?,
            })
        }
    }

    #[test]
    fn key_from_values() {
        let k1 = EntityKey::from_values(&[Value::BigInt(1)]).unwrap();
        let k2 = EntityKey::from_values(&[Value::BigInt(1)]).unwrap();
        assert_eq!(k1, k2);
        assert!(EntityKey::from_values(&[Value::Null]).is_none());
        assert!(EntityKey::from_values(&[]).is_none());
    }

    #[test]
    fn link_identity_and_downcast() {
        let a = new_entity(Widget {
            id: Some(1),
            label: "a".into(),
        });
        let b = new_entity(Widget {
            id: Some(1),
            label: "a".into(),
        });

        let la = EntityLink::new(&a);
        let lb = EntityLink::new(&b);

        // Structurally equal instances remain distinct by identity.
        assert!(!la.same_instance(&lb));
        assert!(la.same_instance(&EntityLink::new(&a)));
        assert_eq!(la.descriptor().table(), "widgets");

        let back = la.downcast::<Widget>().unwrap();
        assert!(Rc::ptr_eq(&back, &a));
    }

    #[test]
    fn modify_without_signal_applies_mutation() {
        let w = new_entity(Widget {
            id: Some(1),
            label: "a".into(),
        });
        modify(&w, |m| m.label = "b".into());
        assert_eq!(w.borrow().label, "b");
    }
}

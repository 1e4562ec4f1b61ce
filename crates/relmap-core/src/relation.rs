//! Association ends between entities.
//!
//! `Ref<T>` holds the single-valued side of a relation (the foreign-key
//! target this entity depends on); `RefList<T>` holds the reverse side
//! (entities that depend on this one). Both feed an entity's
//! `depending`/`dependents` enumeration for commit ordering.

use std::cell::RefCell;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::entity::{Entity, EntityLink, EntityRef};

/// Single-valued association end: the entity this one depends on.
pub struct Ref<T> {
    target: RefCell<Option<EntityRef<T>>>,
}

impl<T> Default for Ref<T> {
    fn default() -> Self {
        Self {
            target: RefCell::new(None),
        }
    }
}

impl<T: Entity> Ref<T> {
    /// An empty association.
    pub fn empty() -> Self {
        Self {
            target: RefCell::new(None),
        }
    }

    /// An association pointing at `target`.
    pub fn to(target: EntityRef<T>) -> Self {
        Self {
            target: RefCell::new(Some(target)),
        }
    }

    /// Point the association at `target`.
    pub fn set(&self, target: EntityRef<T>) {
        *self.target.borrow_mut() = Some(target);
    }

    /// Clear the association.
    pub fn unset(&self) {
        *self.target.borrow_mut() = None;
    }

    /// The current target, if set.
    pub fn get(&self) -> Option<EntityRef<T>> {
        self.target.borrow().clone()
    }

    /// Whether a target is set.
    pub fn is_set(&self) -> bool {
        self.target.borrow().is_some()
    }

    /// Erased link to the target, for dependency enumeration.
    pub fn link(&self) -> Option<EntityLink> {
        self.target.borrow().as_ref().map(EntityLink::new)
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not traverse the target: association graphs may be cyclic.
        let set = self.target.borrow().is_some();
        f.debug_struct("Ref").field("set", &set).finish()
    }
}

impl<T> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        // The FK scalar column carries the value; the association end is
        // not part of the snapshot.
        serializer.serialize_unit()
    }
}

/// Multi-valued association end: entities that depend on this one.
pub struct RefList<T> {
    items: RefCell<Vec<EntityRef<T>>>,
}

impl<T> Default for RefList<T> {
    fn default() -> Self {
        Self {
            items: RefCell::new(Vec::new()),
        }
    }
}

impl<T: Entity> RefList<T> {
    /// An empty collection.
    pub fn empty() -> Self {
        Self {
            items: RefCell::new(Vec::new()),
        }
    }

    /// Append an entity, keeping at most one link per instance.
    pub fn add(&self, item: EntityRef<T>) {
        let mut items = self.items.borrow_mut();
        if !items.iter().any(|e| std::rc::Rc::ptr_eq(e, &item)) {
            items.push(item);
        }
    }

    /// Remove an entity by instance identity.
    pub fn remove(&self, item: &EntityRef<T>) {
        self.items
            .borrow_mut()
            .retain(|e| !std::rc::Rc::ptr_eq(e, item));
    }

    /// Snapshot of the current members.
    pub fn iter(&self) -> Vec<EntityRef<T>> {
        self.items.borrow().clone()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Erased links to all members, for dependency enumeration.
    pub fn links(&self) -> Vec<EntityLink> {
        self.items.borrow().iter().map(EntityLink::new).collect()
    }
}

impl<T> fmt::Debug for RefList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.items.borrow().len();
        f.debug_struct("RefList").field("len", &len).finish()
    }
}

impl<T> Serialize for RefList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

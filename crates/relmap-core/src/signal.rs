//! About-to-change notification hook.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

/// A single-observer "about to change" signal an entity can embed.
///
/// Entities that expose the signal through [`Entity::changing`] opt into
/// subscription-based change tracking: the session table subscribes once
/// and clones the instance when the signal is raised, before the change
/// lands. Field granularity is not required; one signal per instance is
/// sufficient.
///
/// At most one observer is attached at a time. Subscribing again replaces
/// the previous observer; callers that must not double-subscribe track
/// that themselves (the session table does, via its `subscribed` flag).
///
/// [`Entity::changing`]: crate::entity::Entity::changing
#[derive(Default)]
pub struct ChangeSignal {
    observer: RefCell<Option<Rc<dyn Fn()>>>,
}

impl ChangeSignal {
    /// Create an unsubscribed signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the observer, replacing any previous one.
    pub fn subscribe(&self, observer: impl Fn() + 'static) {
        *self.observer.borrow_mut() = Some(Rc::new(observer));
    }

    /// Detach the observer, if any.
    pub fn clear(&self) {
        *self.observer.borrow_mut() = None;
    }

    /// Whether an observer is attached.
    pub fn is_subscribed(&self) -> bool {
        self.observer.borrow().is_some()
    }

    /// Raise the signal. Call before mutating any field.
    pub fn raise(&self) {
        let observer = self.observer.borrow().clone();
        if let Some(observer) = observer {
            observer();
        }
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

// The signal is bookkeeping, not data: serialize as unit so snapshots of
// entities embedding one compare data fields only.
impl Serialize for ChangeSignal {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

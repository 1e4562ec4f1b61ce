//! Tracked items: the session's record of one pending change.

use std::fmt;
use std::rc::Rc;

use relmap_core::{EntityDescriptor, EntityLink, Error};

/// Pending action assigned to a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitAction {
    /// Not tracked for change.
    #[default]
    None,
    /// Must be inserted on next commit.
    Insert,
    /// Must be updated unconditionally.
    Update,
    /// Insert, or update if the key already exists.
    InsertOrUpdate,
    /// Tracked; commit decides whether to emit an update.
    PossibleUpdate,
    /// Must be deleted.
    Delete,
}

impl SubmitAction {
    /// Whether commit has any work to consider for this action.
    pub fn is_pending(self) -> bool {
        !matches!(self, SubmitAction::None)
    }

    /// Whether this action inserts a row.
    pub fn is_insert_like(self) -> bool {
        matches!(self, SubmitAction::Insert | SubmitAction::InsertOrUpdate)
    }

    /// Stable raw representation.
    pub fn as_u8(self) -> u8 {
        match self {
            SubmitAction::None => 0,
            SubmitAction::Insert => 1,
            SubmitAction::Update => 2,
            SubmitAction::InsertOrUpdate => 3,
            SubmitAction::PossibleUpdate => 4,
            SubmitAction::Delete => 5,
        }
    }
}

impl TryFrom<u8> for SubmitAction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(SubmitAction::None),
            1 => Ok(SubmitAction::Insert),
            2 => Ok(SubmitAction::Update),
            3 => Ok(SubmitAction::InsertOrUpdate),
            4 => Ok(SubmitAction::PossibleUpdate),
            5 => Ok(SubmitAction::Delete),
            value => Err(Error::InvalidAction { value }),
        }
    }
}

/// The original state captured for change detection.
///
/// `Snapshot` holds the serialized state taken at tracking time (snapshot
/// strategy); `Absent` means a change subscription stands in for it
/// (subscription strategy). A `PossibleUpdate` item has exactly one of
/// the two.
#[derive(Clone, Default)]
pub enum Original {
    /// No snapshot; change detection relies on the subscription.
    #[default]
    Absent,
    /// Serialized state at tracking time.
    Snapshot(Rc<[u8]>),
}

impl Original {
    /// Capture a snapshot from serialized bytes.
    pub fn snapshot(bytes: Vec<u8>) -> Self {
        Original::Snapshot(bytes.into())
    }

    /// Whether no snapshot is held.
    pub fn is_absent(&self) -> bool {
        matches!(self, Original::Absent)
    }

    /// The snapshot bytes, if held.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Original::Absent => None,
            Original::Snapshot(bytes) => Some(bytes),
        }
    }
}

impl fmt::Debug for Original {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Original::Absent => f.write_str("Absent"),
            Original::Snapshot(bytes) => write!(f, "Snapshot({} bytes)", bytes.len()),
        }
    }
}

/// Immutable record of one pending change.
///
/// Every state transition produces a new item; the session table replaces
/// the stored record wholesale and never mutates one in place.
#[derive(Clone, Debug)]
pub struct TrackedItem {
    entity: EntityLink,
    original: Original,
    state: SubmitAction,
    subscribed: bool,
}

impl TrackedItem {
    /// Track an instance with an initial state.
    pub fn new(entity: EntityLink, state: SubmitAction) -> Self {
        Self {
            entity,
            original: Original::Absent,
            state,
            subscribed: false,
        }
    }

    /// The tracked instance.
    pub fn entity(&self) -> &EntityLink {
        &self.entity
    }

    /// Descriptor of the owning table.
    pub fn table(&self) -> EntityDescriptor {
        self.entity.descriptor()
    }

    /// Identity of the tracked instance.
    pub fn instance_id(&self) -> usize {
        self.entity.instance_id()
    }

    /// The captured original, if any.
    pub fn original(&self) -> &Original {
        &self.original
    }

    /// The assigned action.
    pub fn state(&self) -> SubmitAction {
        self.state
    }

    /// Whether a change subscription is attached to the instance.
    pub fn subscribed(&self) -> bool {
        self.subscribed
    }

    /// A copy with a different state.
    pub fn with_state(&self, state: SubmitAction) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// A copy with a different original.
    pub fn with_original(&self, original: Original) -> Self {
        Self {
            original,
            ..self.clone()
        }
    }

    /// A copy with the subscription flag set.
    pub fn with_subscribed(&self, subscribed: bool) -> Self {
        Self {
            subscribed,
            ..self.clone()
        }
    }

    /// Resolve the action commit would take.
    ///
    /// `PossibleUpdate` evaluates to `Update` when the snapshot strategy is
    /// in effect and `differs` reports the current state diverged from the
    /// snapshot, and to `None` otherwise (including subscription mode,
    /// where a raised signal would already have upgraded the state).
    pub fn effective_action(&self, differs: impl FnOnce(&[u8]) -> bool) -> SubmitAction {
        match (self.state, &self.original) {
            (SubmitAction::PossibleUpdate, Original::Snapshot(bytes)) if differs(bytes) => {
                SubmitAction::Update
            }
            (SubmitAction::PossibleUpdate, _) => SubmitAction::None,
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{new_entity, Entity, Result, Row, Value};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Item {
        id: i64,
    }

    impl Entity for Item {
        const TABLE: &'static str = "items";
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

    fn item(state: SubmitAction) -> TrackedItem {
        TrackedItem::new(EntityLink::new(&new_entity(Item { id: 1 })), state)
    }

    #[test]
    fn raw_round_trip() {
        for action in [
            SubmitAction::None,
            SubmitAction::Insert,
            SubmitAction::Update,
            SubmitAction::InsertOrUpdate,
            SubmitAction::PossibleUpdate,
            SubmitAction::Delete,
        ] {
            assert_eq!(SubmitAction::try_from(action.as_u8()).unwrap(), action);
        }
    }

    #[test]
    fn out_of_range_action_is_invalid() {
        let err = SubmitAction::try_from(42).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { value: 42 }));
    }

    #[test]
    fn transitions_produce_new_items() {
        let first = item(SubmitAction::PossibleUpdate);
        let second = first
            .with_state(SubmitAction::Update)
            .with_original(Original::snapshot(vec![1, 2, 3]));

        assert_eq!(first.state(), SubmitAction::PossibleUpdate);
        assert_eq!(second.state(), SubmitAction::Update);
        assert!(first.original().is_absent());
        assert_eq!(second.original().as_bytes(), Some(&[1u8, 2, 3][..]));
        assert!(first.entity().same_instance(second.entity()));
    }

    #[test]
    fn effective_action_resolves_possible_update() {
        let tracked = item(SubmitAction::PossibleUpdate).with_original(Original::snapshot(vec![1]));

        assert_eq!(
            tracked.effective_action(|_| true),
            SubmitAction::Update
        );
        assert_eq!(
            tracked.effective_action(|_| false),
            SubmitAction::None
        );

        // Subscription mode: no snapshot means nothing to compare.
        let subscribed = item(SubmitAction::PossibleUpdate).with_subscribed(true);
        assert_eq!(
            subscribed.effective_action(|_| true),
            SubmitAction::None
        );

        // Other states pass through untouched.
        assert_eq!(
            item(SubmitAction::Delete).effective_action(|_| true),
            SubmitAction::Delete
        );
    }
}

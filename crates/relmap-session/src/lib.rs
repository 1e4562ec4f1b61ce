//! Entity session and unit of work for relmap.
//!
//! The session sits between application code and a query provider. It
//! tracks the identity and mutation state of materialized entities and
//! flushes accumulated changes to the store as a single transaction in a
//! safe order.
//!
//! # Design
//!
//! - **One object per key**: each table owns an identity cache; every
//!   entity a query materializes is interned before the caller sees it.
//! - **Two change-detection strategies**: a serialized snapshot taken at
//!   tracking time, or a subscription to the instance's about-to-change
//!   signal that clones lazily on first notification.
//! - **Dependency-ordered commit**: pending items are topologically
//!   sorted so foreign-key targets exist before their dependents insert,
//!   dependents are gone before their targets delete, and a delete
//!   vacating a key precedes the insert reusing it.
//! - **Immutable tracked items**: every state transition replaces the
//!   record; cache promotion happens only after the transaction commits.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(provider);
//! let customers = session.table::<Customer>();
//!
//! // Query; every row is interned on materialization.
//! let mut exec = session.executor();
//! let all = customers.select(&mut exec, &query)?.collect_all()?;
//!
//! // Mutate and mark.
//! modify(&all[0], |c| c.city = "Oslo".into());
//! customers.set_submit_action(&new_row, SubmitAction::Insert)?;
//!
//! // One transaction, dependency-ordered.
//! session.submit_changes()?;
//! ```

pub mod intercept;
pub mod session;
pub mod table;
pub mod topo;
pub mod tracked;

pub use intercept::SessionExecutor;
pub use session::{ChangeSet, Session, SessionConfig};
pub use table::Table;
pub use tracked::{Original, SubmitAction, TrackedItem};

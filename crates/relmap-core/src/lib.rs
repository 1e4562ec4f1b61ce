//! Core types and consumed interfaces for the relmap entity session.
//!
//! This crate holds everything the session boundary is built from:
//!
//! - [`Entity`] trait for mapping structs to logical tables
//! - [`Value`] / [`Row`] dynamic data model
//! - [`Provider`] / [`EntityStore`] / [`Executor`] provider port
//! - [`ChangeSignal`] about-to-change hook and [`Ref`]/[`RefList`]
//!   association ends
//! - the shared error taxonomy
//!
//! The session itself lives in `relmap-session`.

pub mod entity;
pub mod error;
pub mod provider;
pub mod relation;
pub mod row;
pub mod signal;
pub mod value;

pub use entity::{
    modify, new_entity, Entity, EntityDescriptor, EntityKey, EntityLink, EntityRef,
};
pub use error::{Error, ProviderError, Result, TypeError};
pub use provider::{Command, EntitySeq, EntityStore, Executor, Projector, Provider};
pub use relation::{Ref, RefList};
pub use row::{ColumnInfo, FromValue, Row};
pub use signal::ChangeSignal;
pub use value::{hash_values, Value};

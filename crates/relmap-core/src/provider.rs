//! The provider port: interfaces consumed from an external query provider.
//!
//! The SQL translator and expression pipeline are external; by the time a
//! query reaches the session it is an opaque [`Command`]. The provider
//! supplies per-type CRUD stores, a streaming executor that materializes
//! rows through a caller-supplied projector, and a transaction primitive.

use crate::entity::Entity;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// An opaque, already-translated query with its parameters.
#[derive(Debug, Clone)]
pub struct Command {
    /// Translated query text.
    pub text: String,
    /// Bound parameters, in order.
    pub params: Vec<Value>,
}

impl Command {
    /// Create a parameterless command.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Attach parameters.
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// A projector materializes one result row into a `T`.
pub type Projector<T> = Box<dyn FnMut(&Row) -> Result<T>>;

/// A lazy sequence of materialized results.
///
/// Enumeration is deferred: the projector runs once per row as the caller
/// iterates. A failing projector surfaces as an `Err` item; rows yielded
/// before the failure stand.
pub struct EntitySeq<T> {
    inner: Box<dyn Iterator<Item = Result<T>>>,
}

impl<T: 'static> EntitySeq<T> {
    /// Wrap an iterator of results.
    pub fn new(inner: impl Iterator<Item = Result<T>> + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// An empty sequence.
    pub fn empty() -> Self {
        Self {
            inner: Box::new(std::iter::empty()),
        }
    }

    /// Drain the sequence into a vector, stopping at the first error.
    pub fn collect_all(self) -> Result<Vec<T>> {
        self.into_iter().collect()
    }
}

impl<T> Iterator for EntitySeq<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// CRUD-capable underlying table for one entity type.
pub trait EntityStore<M: Entity> {
    /// Insert a row.
    fn insert(&self, row: &M) -> Result<()>;

    /// Update a row by its primary key.
    fn update(&self, row: &M) -> Result<()>;

    /// Insert the row, or update it if the key already exists.
    fn insert_or_update(&self, row: &M) -> Result<()>;

    /// Delete a row by its primary key.
    fn delete(&self, row: &M) -> Result<()>;

    /// Fetch a row by primary key values.
    fn get_by_id(&self, key: &[Value]) -> Result<Option<M>>;
}

/// Streaming query executor.
pub trait Executor {
    /// Execute a query, materializing each row through `projector`.
    ///
    /// The returned sequence is lazy; batch consumers use
    /// [`EntitySeq::collect_all`].
    fn execute<T: 'static>(&mut self, command: &Command, projector: Projector<T>)
        -> Result<EntitySeq<T>>;

    /// Execute a non-projecting command, returning rows affected.
    fn execute_command(&mut self, command: &Command) -> Result<u64>;

    /// Execute a batch of non-projecting commands.
    fn execute_batch(&mut self, commands: &[Command]) -> Result<Vec<u64>> {
        commands.iter().map(|c| self.execute_command(c)).collect()
    }
}

/// The underlying query provider.
pub trait Provider {
    /// Per-type CRUD store.
    type Store<M: Entity>: EntityStore<M> + 'static;

    /// Executor type produced by [`Provider::create_executor`].
    type Executor: Executor;

    /// Resolve the CRUD store for an entity type.
    fn store<M: Entity>(&self) -> Self::Store<M>;

    /// Create a streaming executor.
    fn create_executor(&self) -> Self::Executor;

    /// Run `work` inside a transaction, rolling back on failure.
    fn transacted(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Render a command for diagnostics.
    fn query_text(&self, command: &Command) -> String {
        command.text.clone()
    }

    /// Whether the provider would evaluate this command locally rather
    /// than shipping it to the store.
    fn can_evaluate_locally(&self, _command: &Command) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_builder() {
        let cmd = Command::new("select 1").with_params(vec![Value::Int(1)]);
        assert_eq!(cmd.text, "select 1");
        assert_eq!(cmd.params.len(), 1);
    }

    #[test]
    fn entity_seq_is_lazy() {
        use std::cell::Cell;
        use std::rc::Rc;

        let pulled = Rc::new(Cell::new(0));
        let counter = Rc::clone(&pulled);
        let mut seq = EntitySeq::new((0..3).map(move |i| {
            counter.set(counter.get() + 1);
            Ok(i)
        }));

        assert_eq!(pulled.get(), 0);
        assert_eq!(seq.next().unwrap().unwrap(), 0);
        assert_eq!(pulled.get(), 1);
    }

    #[test]
    fn entity_seq_collects_until_error() {
        let seq = EntitySeq::new(vec![Ok(1), Err(crate::Error::provider("boom")), Ok(3)].into_iter());
        assert!(seq.collect_all().is_err());
    }
}

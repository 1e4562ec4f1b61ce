//! Query interception: routing materialized rows through the identity map.
//!
//! [`SessionExecutor`] presents the wrapped executor's contract. The
//! entity-projecting variants replace the projector with one that interns
//! each materialized row into the owning session table, so no entity
//! reaches the caller without passing through `on_materialized`. Scalar
//! projections, commands, and batches pass through untouched.

use relmap_core::{
    Command, Entity, EntityRef, EntitySeq, EntityStore, Executor, Projector, Result, Row,
};

use crate::table::Table;

/// Executor facade that interns every materialized entity.
pub struct SessionExecutor<E: Executor> {
    inner: E,
}

impl<E: Executor> SessionExecutor<E> {
    pub(crate) fn new(inner: E) -> Self {
        Self { inner }
    }

    /// Execute an entity query with the default row materialization
    /// (`M::from_row`), interning each row into `table`.
    pub fn query<M, S>(
        &mut self,
        table: &Table<M, S>,
        command: &Command,
    ) -> Result<EntitySeq<EntityRef<M>>>
    where
        M: Entity,
        S: EntityStore<M> + 'static,
    {
        self.query_with(table, command, Box::new(|row: &Row| M::from_row(row)))
    }

    /// Execute an entity query with a caller-supplied projector.
    ///
    /// The projector is wrapped so its output is interned before the
    /// caller sees it; enumeration stays lazy.
    pub fn query_with<M, S>(
        &mut self,
        table: &Table<M, S>,
        command: &Command,
        mut projector: Projector<M>,
    ) -> Result<EntitySeq<EntityRef<M>>>
    where
        M: Entity,
        S: EntityStore<M> + 'static,
    {
        tracing::debug!(table = M::TABLE, query = %command.text, "executing entity query");
        let table = table.clone();
        self.inner.execute(
            command,
            Box::new(move |row| {
                let instance = projector(row)?;
                table.on_materialized(instance)
            }),
        )
    }

    /// Execute a query projecting non-entity values. Pass-through: nothing
    /// to intern.
    pub fn scalars<T: 'static>(
        &mut self,
        command: &Command,
        projector: Projector<T>,
    ) -> Result<EntitySeq<T>> {
        self.inner.execute(command, projector)
    }

    /// Execute a non-projecting command. Pass-through.
    pub fn command(&mut self, command: &Command) -> Result<u64> {
        self.inner.execute_command(command)
    }

    /// Execute a batch of non-projecting commands. Pass-through.
    pub fn batch(&mut self, commands: &[Command]) -> Result<Vec<u64>> {
        self.inner.execute_batch(commands)
    }
}

impl<M: Entity, S: EntityStore<M> + 'static> Table<M, S> {
    /// Run `command` against this table through the session executor,
    /// yielding interned instances.
    pub fn select<E: Executor>(
        &self,
        executor: &mut SessionExecutor<E>,
        command: &Command,
    ) -> Result<EntitySeq<EntityRef<M>>> {
        executor.query(self, command)
    }
}

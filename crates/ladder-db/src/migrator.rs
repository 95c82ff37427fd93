//! Applies an ordered sequence of migrations inside a single transaction.
//!
//! A run begins a transaction, asks the state store where the previous run
//! stopped, applies every migration after that point in order and records
//! each one as it completes. The transaction is committed only if every
//! step succeeds; any failure rolls back the migrations and the recorded
//! state together.

use std::fmt;

use ladder_common::Error;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::{Database, Transaction};
use crate::state_store::{NoopStore, StateStore};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

type SetupHook = Box<dyn FnMut(usize, Option<usize>)>;
type DoneHook = Box<dyn FnMut(usize, usize)>;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] Error),

    #[error("failed to prepare state store: {0}")]
    Prepare(#[source] Error),

    #[error("failed to get last migration: {0}")]
    State(#[source] Error),

    #[error("last migration index ({start}) is out of bounds (<{len})")]
    OutOfBounds { start: usize, len: usize },

    #[error("failed to run migration {index}: {source}")]
    Migration {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to update migration state for {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: Error,
    },

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] Error),

    #[error("failed to discard read-only transaction: {0}")]
    Discard(#[source] Error),

    #[error("migration failed, and failed to rollback transaction: {rollback}; original error: {original}")]
    Rollback {
        #[source]
        original: Box<MigrateError>,
        rollback: Error,
    },
}

impl MigrateError {
    /// True when the stored state already covers every known migration,
    /// i.e. there was nothing left to apply.
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Self::OutOfBounds { start, len } if start == len)
    }
}

/// A single forward step. Its identity is its position in the sequence.
pub struct Migration<C: ?Sized> {
    name: Option<String>,
    run: Box<dyn Fn(&C) -> Result<(), BoxError>>,
}

impl<C: ?Sized> Migration<C> {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&C) -> Result<(), BoxError> + 'static,
    {
        Self {
            name: None,
            run: Box::new(run),
        }
    }

    /// Same as `new`, with a label that only shows up in logs.
    pub fn named<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&C) -> Result<(), BoxError> + 'static,
    {
        Self {
            name: Some(name.into()),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn run(&self, conn: &C) -> Result<(), BoxError> {
        (self.run)(conn)
    }
}

impl<C: ?Sized> fmt::Debug for Migration<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Where a sequence stands relative to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub last_applied: Option<usize>,
    pub resume_point: usize,
    pub total: usize,
    pub pending: usize,
}

impl Status {
    pub fn is_up_to_date(&self) -> bool {
        self.pending == 0
    }
}

/// Runs migrations against databases whose connection view is `C`.
pub struct Migrator<C: ?Sized> {
    migrations: Vec<Migration<C>>,
    store: Box<dyn StateStore<C>>,
    on_setup_complete: Option<SetupHook>,
    on_migration_done: Option<DoneHook>,
}

impl<C: ?Sized + 'static> Migrator<C> {
    /// A migrator that tracks progress with a [`NoopStore`].
    pub fn new(migrations: Vec<Migration<C>>) -> Self {
        Self {
            migrations,
            store: Box::new(NoopStore::new()),
            on_setup_complete: None,
            on_migration_done: None,
        }
    }
}

impl<C: ?Sized> Migrator<C> {
    #[must_use]
    pub fn with_store(mut self, store: impl StateStore<C> + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Called once per run after the resume point is known, with the resume
    /// point and the last applied index.
    #[must_use]
    pub fn on_setup_complete(mut self, hook: impl FnMut(usize, Option<usize>) + 'static) -> Self {
        self.on_setup_complete = Some(Box::new(hook));
        self
    }

    /// Called after each migration is applied and recorded, with its
    /// position relative to the resume point and the resume point itself.
    #[must_use]
    pub fn on_migration_done(mut self, hook: impl FnMut(usize, usize) + 'static) -> Self {
        self.on_migration_done = Some(Box::new(hook));
        self
    }

    /// Append a migration to the end of the sequence.
    pub fn push(&mut self, migration: Migration<C>) {
        self.migrations.push(migration);
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Apply every migration after the stored resume point in one
    /// transaction.
    ///
    /// Fails with [`MigrateError::OutOfBounds`] when nothing is pending: a
    /// stored state at or past the end of the sequence means deployed code
    /// and database disagree, and is not treated as success.
    pub fn migrate<D>(&mut self, db: &mut D) -> Result<(), MigrateError>
    where
        D: Database<Conn = C>,
    {
        let tx = db.begin().map_err(MigrateError::Begin)?;

        if let Err(err) = self.apply(&*tx) {
            warn!("migration failed, rolling back: {err}");
            if let Err(rollback) = tx.rollback() {
                error!("rollback failed: {rollback}");
                return Err(MigrateError::Rollback {
                    original: Box::new(err),
                    rollback,
                });
            }
            return Err(err);
        }

        tx.commit().map_err(MigrateError::Commit)?;
        info!("migrations committed");
        Ok(())
    }

    /// Report the stored state without applying anything. The store is
    /// prepared inside a transaction that is always rolled back.
    pub fn status<D>(&mut self, db: &mut D) -> Result<Status, MigrateError>
    where
        D: Database<Conn = C>,
    {
        let tx = db.begin().map_err(MigrateError::Begin)?;
        let status = self.read_status(&*tx);

        match (status, tx.rollback()) {
            (Ok(status), Ok(())) => Ok(status),
            (Ok(_), Err(e)) => Err(MigrateError::Discard(e)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(rollback)) => Err(MigrateError::Rollback {
                original: Box::new(err),
                rollback,
            }),
        }
    }

    fn read_status(&mut self, conn: &C) -> Result<Status, MigrateError> {
        self.store.prepare(conn).map_err(MigrateError::Prepare)?;
        let last_applied = self.store.get(conn).map_err(MigrateError::State)?;
        let resume_point = resume_point(last_applied).unwrap_or(usize::MAX);
        let total = self.migrations.len();

        Ok(Status {
            last_applied,
            resume_point,
            total,
            pending: total.saturating_sub(resume_point),
        })
    }

    fn apply(&mut self, conn: &C) -> Result<(), MigrateError> {
        self.store.prepare(conn).map_err(MigrateError::Prepare)?;
        let last = self.store.get(conn).map_err(MigrateError::State)?;

        let len = self.migrations.len();
        let start = resume_point(last).ok_or(MigrateError::OutOfBounds {
            start: usize::MAX,
            len,
        })?;
        if start >= len {
            return Err(MigrateError::OutOfBounds { start, len });
        }

        match last {
            Some(last) => info!("migrations initialized, latest migration is {last}"),
            None => info!("migrations initialized, no migrations have run"),
        }
        if let Some(hook) = self.on_setup_complete.as_mut() {
            hook(start, last);
        }

        for (offset, migration) in self.migrations[start..].iter().enumerate() {
            let index = start + offset;

            migration
                .run(conn)
                .map_err(|source| MigrateError::Migration { index, source })?;

            self.store
                .set(conn, index)
                .map_err(|source| MigrateError::Record { index, source })?;

            match migration.name() {
                Some(name) => info!("migration {}/{len} done ({name})", index + 1),
                None => info!("migration {}/{len} done", index + 1),
            }
            if let Some(hook) = self.on_migration_done.as_mut() {
                hook(offset, start);
            }
        }

        Ok(())
    }
}

impl<C: ?Sized> fmt::Debug for Migrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

/// Index of the next migration to run. `None` when the stored index is the
/// largest representable one, which no sequence can be long enough for.
fn resume_point(last: Option<usize>) -> Option<usize> {
    match last {
        Some(last) => last.checked_add(1),
        None => Some(0),
    }
}

use ladder_common::Result;

/// Tracks the index of the last migration that was applied.
///
/// Every call runs against the connection view of the transaction the
/// migrator opened. Implementations must not begin or commit transactions
/// of their own: whatever `set` writes has to disappear if the enclosing
/// transaction is rolled back.
pub trait StateStore<C: ?Sized> {
    /// Create whatever the store needs to persist its state. Called at the
    /// start of every run, so it must be idempotent.
    fn prepare(&mut self, conn: &C) -> Result<()>;

    /// The index of the last applied migration, or `None` if nothing has
    /// been applied yet.
    fn get(&mut self, conn: &C) -> Result<Option<usize>>;

    /// Record that the migration at `index` has been applied.
    fn set(&mut self, conn: &C, index: usize) -> Result<()>;
}

/// A store that only remembers the last index in memory.
///
/// Nothing is persisted, so a fresh store always runs every migration. The
/// held value lives as long as the store itself and is not tied to the
/// transaction outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NoopStore {
    last: Option<usize>,
}

impl NoopStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start as if migrations up to and including `last` had already run.
    pub fn with_last(last: usize) -> Self {
        Self { last: Some(last) }
    }

    pub fn last(&self) -> Option<usize> {
        self.last
    }
}

impl<C: ?Sized> StateStore<C> for NoopStore {
    fn prepare(&mut self, _conn: &C) -> Result<()> {
        Ok(())
    }

    fn get(&mut self, _conn: &C) -> Result<Option<usize>> {
        Ok(self.last)
    }

    fn set(&mut self, _conn: &C, index: usize) -> Result<()> {
        self.last = Some(index);
        Ok(())
    }
}

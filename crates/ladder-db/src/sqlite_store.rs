use std::fmt;

use chrono::{DateTime, Utc};
use ladder_common::{Error, Result};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::state_store::StateStore;

/// State store that keeps one row per applied migration in a SQLite table.
///
/// The table has an integer primary key holding the migration index and a
/// `created` text column with an RFC 3339 timestamp. The last applied index
/// is `MAX(id)`, which assumes rows are inserted in ascending order; the
/// migrator only ever does that.
pub struct SqliteStore {
    table: String,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl SqliteStore {
    pub const DEFAULT_TABLE: &'static str = "migrations";

    pub fn new() -> Self {
        Self {
            table: Self::DEFAULT_TABLE.to_string(),
            clock: Box::new(Utc::now),
        }
    }

    /// Use `table` instead of `migrations`. The name is interpolated into
    /// SQL, so it has to be a plain identifier.
    pub fn with_table(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self {
            table,
            ..Self::new()
        })
    }

    /// Replace the wall clock used for the `created` column.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Default for SqliteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl StateStore<Connection> for SqliteStore {
    fn prepare(&mut self, conn: &Connection) -> Result<()> {
        debug!("preparing migration table {}", self.table);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, created TEXT)",
            self.table
        ))
        .map_err(|e| Error::Storage(format!("failed to create migrations table: {e}")))
    }

    fn get(&mut self, conn: &Connection) -> Result<Option<usize>> {
        let max: Option<i64> = conn
            .query_row(&format!("SELECT MAX(id) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| Error::Storage(format!("failed to get current migration: {e}")))?;

        max.map(to_index).transpose()
    }

    fn set(&mut self, conn: &Connection, index: usize) -> Result<()> {
        let id = i64::try_from(index)
            .map_err(|_| Error::Storage(format!("migration index {index} does not fit in SQLite")))?;
        let created = (self.clock)().to_rfc3339();
        debug!("recording migration {index} in {}", self.table);
        conn.execute(
            &format!("INSERT INTO {} (id, created) VALUES (?1, ?2)", self.table),
            params![id, created],
        )
        .map_err(|e| Error::Storage(format!("failed to insert migration {index}: {e}")))?;
        Ok(())
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid migrations table name: {name:?}")))
    }
}

fn to_index(id: i64) -> Result<usize> {
    usize::try_from(id).map_err(|_| Error::Storage(format!("invalid migration index {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn table_sql(conn: &Connection, name: &str) -> String {
        conn.query_row(
            "SELECT sql FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn prepare_creates_default_table() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteStore::new().prepare(&conn).unwrap();

        assert_eq!(
            table_sql(&conn, "migrations"),
            "CREATE TABLE migrations (id INTEGER PRIMARY KEY, created TEXT)"
        );
    }

    #[test]
    fn prepare_uses_custom_table_name() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteStore::with_table("schema_log")
            .unwrap()
            .prepare(&conn)
            .unwrap();

        assert_eq!(
            table_sql(&conn, "schema_log"),
            "CREATE TABLE schema_log (id INTEGER PRIMARY KEY, created TEXT)"
        );
    }

    #[test]
    fn prepare_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new();
        store.prepare(&conn).unwrap();
        store.set(&conn, 0).unwrap();
        store.prepare(&conn).unwrap();

        assert_eq!(store.get(&conn).unwrap(), Some(0));
    }

    #[test]
    fn rejects_table_names_that_are_not_identifiers() {
        for name in ["", "1abc", "migrations; DROP TABLE users", "my-table", "a b"] {
            let err = SqliteStore::with_table(name).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "accepted {name:?}");
        }
        assert!(SqliteStore::with_table("_schema_v2").is_ok());
    }

    #[test]
    fn get_on_empty_table_returns_none() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new();
        store.prepare(&conn).unwrap();

        assert_eq!(store.get(&conn).unwrap(), None);
    }

    #[test]
    fn get_without_prepare_is_a_storage_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = SqliteStore::new().get(&conn).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn set_then_get_in_same_transaction() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        let mut store = SqliteStore::new();
        store.prepare(&*tx).unwrap();
        store.set(&*tx, 123).unwrap();

        assert_eq!(store.get(&*tx).unwrap(), Some(123));
    }

    #[test]
    fn get_returns_highest_index() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new();
        store.prepare(&conn).unwrap();
        for i in 0..4 {
            store.set(&conn, i).unwrap();
        }

        assert_eq!(store.get(&conn).unwrap(), Some(3));
    }

    #[test]
    fn set_rejects_duplicate_index() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new();
        store.prepare(&conn).unwrap();
        store.set(&conn, 0).unwrap();

        let err = store.set(&conn, 0).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn set_stamps_rows_with_injected_clock() {
        let conn = Connection::open_in_memory().unwrap();
        let mut store = SqliteStore::new().with_clock(fixed_clock);
        store.prepare(&conn).unwrap();
        store.set(&conn, 312).unwrap();

        let created: String = conn
            .query_row("SELECT created FROM migrations WHERE id = 312", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(created, "2024-05-01T12:00:00+00:00");
    }
}

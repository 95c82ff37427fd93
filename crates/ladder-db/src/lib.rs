pub mod database;
pub mod migrator;
pub mod sql_files;
pub mod sqlite_store;
pub mod state_store;

pub use database::{Database, Transaction};
pub use migrator::{BoxError, MigrateError, Migration, Migrator, Status};
pub use sql_files::load_sql_dir;
pub use sqlite_store::SqliteStore;
pub use state_store::{NoopStore, StateStore};

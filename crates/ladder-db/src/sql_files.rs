use std::path::{Path, PathBuf};

use ladder_common::{Error, Result};
use rusqlite::Connection;
use tracing::debug;

use crate::migrator::Migration;

/// Load every `*.sql` file in `dir` as a migration, ordered by file name.
///
/// Each file's contents run as one batch. Since the position decides the
/// index, files must only ever be appended with names that sort last.
pub fn load_sql_dir(dir: &Path) -> Result<Vec<Migration<Connection>>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| -> Result<Migration<Connection>> {
            let sql = std::fs::read_to_string(&path)?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Other(format!("non UTF-8 file name: {}", path.display())))?
                .to_string();
            debug!("loaded migration {name}");
            Ok(Migration::named(name, move |conn: &Connection| {
                conn.execute_batch(&sql)?;
                Ok(())
            }))
        })
        .collect()
}

use anyhow::{Context, Result, bail};
use ladder_config::AppConfig;
use ladder_db::{MigrateError, Migrator, NoopStore, SqliteStore, load_sql_dir};
use rusqlite::Connection;
use tracing::info;

fn open(config: &AppConfig) -> Result<Connection> {
    let path = &config.database.path;
    info!("opening database at {}", path.display());
    Connection::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn build_migrator(config: &AppConfig) -> Result<Migrator<Connection>> {
    let dir = &config.migrations.dir;
    let migrations = load_sql_dir(dir)
        .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
    let total = migrations.len();

    let migrator = Migrator::new(migrations)
        .on_setup_complete(|start, last| match last {
            Some(last) => info!("resuming after migration {last}, starting at {start}"),
            None => info!("no migrations recorded, starting at {start}"),
        })
        .on_migration_done(move |offset, start| {
            info!("applied {}/{}", offset + 1, total - start);
        });

    if config.migrations.tracking {
        let store = SqliteStore::with_table(config.migrations.table.clone())?;
        Ok(migrator.with_store(store))
    } else {
        Ok(migrator.with_store(NoopStore::new()))
    }
}

pub fn migrate(config: &AppConfig) -> Result<()> {
    let mut conn = open(config)?;
    let mut migrator = build_migrator(config)?;

    match migrator.migrate(&mut conn) {
        Ok(()) => {
            println!("Migrations done");
            Ok(())
        }
        Err(err) if err.is_up_to_date() => {
            bail!("nothing to migrate, database is already up to date ({err})")
        }
        Err(err @ MigrateError::Commit(_)) => Err(err).context(
            "commit failed; the database may or may not contain the changes, check before retrying",
        ),
        Err(err) => Err(err).context("unable to run migrations"),
    }
}

pub fn status(config: &AppConfig, json: bool) -> Result<()> {
    let mut conn = open(config)?;
    let mut migrator = build_migrator(config)?;
    let status = migrator
        .status(&mut conn)
        .context("unable to read migration status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status.last_applied {
        Some(last) => println!("Last applied: {last}"),
        None => println!("Last applied: none"),
    }
    println!("Known:        {}", status.total);
    println!("Pending:      {}", status.pending);
    if status.resume_point > status.total {
        println!("Warning: stored state is ahead of the known migrations");
    }
    Ok(())
}

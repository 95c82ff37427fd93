mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ladder_config::{AppConfig, ConfigLoader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ladder", version, about = "Apply ordered SQL migrations to a SQLite database")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (.yml, .yaml or .toml)
    #[arg(short, long, global = true, env = "LADDER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Directory of .sql migrations
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Table that records applied migrations
    #[arg(long, global = true)]
    table: Option<String>,

    /// Do not persist progress; every run starts from the first migration
    #[arg(long, global = true)]
    no_tracking: bool,

    /// Log filter, e.g. "debug" or "ladder_db=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply all pending migrations in one transaction
    Migrate,
    /// Show how far the database has been migrated
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = resolve_config(&cli.opts)?;
    init_tracing(&config);

    match cli.command {
        Command::Migrate => commands::migrate(&config),
        Command::Status { json } => commands::status(&config, json),
    }
}

/// File and environment first, then command line flags on top.
fn resolve_config(opts: &GlobalOpts) -> Result<AppConfig> {
    let mut config = ConfigLoader::load(opts.config.as_deref())?;

    if let Some(database) = &opts.database {
        config.database.path = database.clone();
    }
    if let Some(dir) = &opts.dir {
        config.migrations.dir = dir.clone();
    }
    if let Some(table) = &opts.table {
        config.migrations.table = table.clone();
    }
    if opts.no_tracking {
        config.migrations.tracking = false;
    }
    if let Some(level) = &opts.log_level {
        config.log.level = level.clone();
    }
    if opts.json_logs {
        config.log.json = true;
    }
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "ladder",
            "--config",
            "/nonexistent/ladder.yml",
            "migrate",
        ])
        .unwrap();
        assert!(resolve_config(&cli.opts).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladder.yml");
        std::fs::write(&path, "database:\n  path: from-file.db\n").unwrap();
        let cli = Cli::try_parse_from([
            "ladder",
            "status",
            "--config",
            path.to_str().unwrap(),
            "--table",
            "schema_log",
            "--no-tracking",
        ])
        .unwrap();

        let config = resolve_config(&cli.opts).unwrap();
        assert_eq!(config.database.path, PathBuf::from("from-file.db"));
        assert_eq!(config.migrations.table, "schema_log");
        assert!(!config.migrations.tracking);
        assert!(matches!(cli.command, Command::Status { json: false }));
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

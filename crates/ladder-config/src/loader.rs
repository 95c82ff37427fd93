use std::path::{Path, PathBuf};

use ladder_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const DEFAULT_CONFIG_FILES: &[&str] = &["ladder.yml", "ladder.yaml", "ladder.toml"];

/// Resolves the effective `AppConfig` from a file plus environment
/// overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from `path`, or from the first `ladder.{yml,yaml,toml}`
    /// in the working directory when no path is given. A missing default
    /// file falls back to built-in defaults; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::find_default() {
                Some(found) => Self::from_file(&found)?,
                None => {
                    debug!("no config file found, using defaults");
                    AppConfig::default()
                }
            },
        };

        Self::apply_env(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("config loaded from {}", path.display());
        Ok(config)
    }

    fn find_default() -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }

    /// Overlay `LADDER_*` variables. `lookup` is injected so tests don't
    /// have to touch the process environment.
    pub fn apply_env<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("LADDER_DATABASE") {
            config.database.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("LADDER_MIGRATIONS_DIR") {
            config.migrations.dir = PathBuf::from(dir);
        }
        if let Some(table) = lookup("LADDER_TABLE") {
            config.migrations.table = table;
        }
        if let Some(level) = lookup("LADDER_LOG") {
            config.log.level = level;
        }
    }
}

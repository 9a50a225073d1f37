//! Configuration loader and validator for the watchlist availability job.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub tmdb: Tmdb,
    pub push: Push,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Users with fewer watchlist items than this are skipped entirely.
    pub min_watchlist_size: usize,
}

/// Metadata provider (TMDB) settings. The API key is the one secret this job
/// needs; a run cannot fetch anything without it, so an empty key fails
/// validation at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tmdb {
    pub api_key: String,
    /// Override for tests; defaults to the public TMDB API.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Push delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    pub server_key: String,
    /// Override for tests; defaults to the FCM legacy send endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.min_watchlist_size == 0 {
        return Err(ConfigError::Invalid("app.min_watchlist_size must be > 0"));
    }

    if cfg.tmdb.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("tmdb.api_key must be non-empty"));
    }

    if cfg.push.server_key.trim().is_empty() {
        return Err(ConfigError::Invalid("push.server_key must be non-empty"));
    }

    Ok(())
}

/// Example YAML configuration, also used as the test fixture.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  min_watchlist_size: 3

tmdb:
  api_key: "YOUR_TMDB_API_KEY"

push:
  server_key: "YOUR_FCM_SERVER_KEY"
"#
}

//! Configuration for the edge validator.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/collabtodo-edge/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use chrono::TimeDelta;
use collabtodo_proto::policy::DEFAULT_DELETE_CUTOFF;

/// Errors that can occur when loading edge configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The delete cutoff is not a usable positive number of hours.
    #[error("delete_cutoff_hours out of range: {0}")]
    InvalidCutoff(i64),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EdgeConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    delete_cutoff_hours: Option<i64>,
    seed_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the edge server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "CollabTodo edge task validator")]
pub struct EdgeCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "EDGE_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/collabtodo-edge/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tasks older than this many hours cannot be deleted.
    #[arg(long)]
    pub delete_cutoff_hours: Option<i64>,

    /// JSON file with bearer tokens and task rows to serve.
    #[arg(long, env = "EDGE_SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "EDGE_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved edge configuration.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Age past which deletes are refused.
    pub delete_cutoff: TimeDelta,
    /// Optional seed data.
    pub seed_file: Option<PathBuf>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            delete_cutoff: DEFAULT_DELETE_CUTOFF,
            seed_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl EdgeConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise a missing default file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or the resolved cutoff is not positive.
    pub fn load(cli: &EdgeCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    fn resolve(cli: &EdgeCliArgs, file: &EdgeConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let delete_cutoff = match cli.delete_cutoff_hours.or(file.server.delete_cutoff_hours) {
            Some(hours) if hours > 0 => {
                TimeDelta::try_hours(hours).ok_or(ConfigError::InvalidCutoff(hours))?
            }
            Some(hours) => return Err(ConfigError::InvalidCutoff(hours)),
            None => defaults.delete_cutoff,
        };

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            delete_cutoff,
            seed_file: cli
                .seed_file
                .clone()
                .or_else(|| file.server.seed_file.clone()),
            log_level: cli.log_level.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<EdgeConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(EdgeConfigFile::default());
        };
        config_dir.join("collabtodo-edge").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EdgeConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

//! Configuration system for the `CollabTodo` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/collabtodo/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error. Loading never checks
//! that the store settings are usable; call [`ClientConfig::validate`].

use std::path::PathBuf;
use std::time::Duration;

use collabtodo_proto::task::MAX_TASK_TEXT_LENGTH;

/// Substrings that mark a value copied unchanged from a template.
const PLACEHOLDER_MARKERS: [&str; 2] = ["your-", "example"];

/// Errors that can occur when loading or validating configuration.
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

    /// The resolved configuration cannot be used.
    #[error("invalid configuration: {}", problems.join("; "))]
    Invalid {
        /// One entry per offending setting.
        problems: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: StoreFileConfig,
    features: FeaturesFileConfig,
    limits: LimitsFileConfig,
    client: ClientFileConfig,
}

/// `[store]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreFileConfig {
    url: Option<String>,
    anon_key: Option<String>,
}

/// `[features]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FeaturesFileConfig {
    enable_oauth: Option<bool>,
    enable_audit_logging: Option<bool>,
}

/// `[limits]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LimitsFileConfig {
    max_task_length: Option<usize>,
    session_timeout_secs: Option<u64>,
}

/// `[client]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientFileConfig {
    user_agent: Option<String>,
    channel_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Store --
    /// Base URL of the hosted store.
    pub store_url: Option<String>,
    /// Public API key sent with every store request.
    pub anon_key: Option<String>,

    // -- Features --
    /// Offer third-party (OAuth) sign-in.
    pub enable_oauth: bool,
    /// Write audit rows for auth attempts and task mutations.
    pub enable_audit_logging: bool,

    // -- Limits --
    /// Maximum task text length in characters.
    pub max_task_length: usize,
    /// Session lifetime before the user must sign in again.
    pub session_timeout: Duration,

    // -- Client --
    /// User agent recorded in audit rows.
    pub user_agent: String,
    /// Capacity of the completion and notification channels.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            anon_key: None,
            enable_oauth: true,
            enable_audit_logging: true,
            max_task_length: MAX_TASK_TEXT_LENGTH,
            session_timeout: Duration::from_secs(3600),
            user_agent: concat!("collabtodo/", env!("CARGO_PKG_VERSION")).to_string(),
            channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or if any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            store_url: cli.store_url.clone().or_else(|| file.store.url.clone()),
            anon_key: cli
                .anon_key
                .clone()
                .or_else(|| file.store.anon_key.clone()),
            enable_oauth: file
                .features
                .enable_oauth
                .unwrap_or(defaults.enable_oauth),
            enable_audit_logging: file
                .features
                .enable_audit_logging
                .unwrap_or(defaults.enable_audit_logging),
            max_task_length: cli
                .max_task_length
                .or(file.limits.max_task_length)
                .unwrap_or(defaults.max_task_length),
            session_timeout: file
                .limits
                .session_timeout_secs
                .map_or(defaults.session_timeout, Duration::from_secs),
            user_agent: file
                .client
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            channel_capacity: file
                .client
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
        }
    }

    /// Checks that the store settings are present and usable.
    ///
    /// Every problem is reported, not just the first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing missing values, values still
    /// holding template placeholders, a malformed store URL, and zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        match self.store_url.as_deref().map(str::trim) {
            None | Some("") => problems.push("store url is not set".to_string()),
            Some(url) if is_placeholder(url) => {
                problems.push("store url still holds a placeholder value".to_string());
            }
            Some(url) => {
                if let Err(e) = url::Url::parse(url) {
                    problems.push(format!("store url is not a valid URL: {e}"));
                }
            }
        }

        match self.anon_key.as_deref().map(str::trim) {
            None | Some("") => problems.push("anon key is not set".to_string()),
            Some(key) if is_placeholder(key) => {
                problems.push("anon key still holds a placeholder value".to_string());
            }
            Some(_) => {}
        }

        if self.max_task_length == 0 {
            problems.push("max_task_length must be greater than zero".to_string());
        }
        if self.channel_capacity == 0 {
            problems.push("channel_capacity must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_MARKERS.iter().any(|m| value.contains(m))
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Collaborative to-do list with realtime sync")]
pub struct CliArgs {
    /// Base URL of the hosted store.
    #[arg(long, env = "COLLABTODO_STORE_URL")]
    pub store_url: Option<String>,

    /// Public API key for the store.
    #[arg(long, env = "COLLABTODO_ANON_KEY")]
    pub anon_key: Option<String>,

    /// Maximum task text length in characters.
    #[arg(long)]
    pub max_task_length: Option<usize>,

    /// Path to config file (default: `~/.config/collabtodo/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run against the in-process store without checking store settings.
    #[arg(long)]
    pub offline: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "COLLABTODO_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/collabtodo.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("collabtodo").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

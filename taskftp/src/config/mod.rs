//! Configuration system for the `taskftp` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskftp/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::SyncConfig;
use crate::transport::RemoteEndpoint;

/// Errors that can occur when loading configuration.
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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    remote: RemoteFileConfig,
    sync: SyncFileConfig,
}

/// `[remote]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemoteFileConfig {
    host: Option<String>,
    port: Option<u16>,
    directory: Option<String>,
    username: Option<String>,
    password: Option<String>,
    file_name: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    poll_interval_secs: Option<u64>,
    local_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Remote --
    /// FTP host. `None` means nothing to sync with.
    pub host: Option<String>,
    /// FTP control port.
    pub port: u16,
    /// Remote directory holding the task file.
    pub directory: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Name of the remote task file.
    pub file_name: String,
    /// Bound on connecting and logging in.
    pub connect_timeout: Duration,

    // -- Sync --
    /// How often local changes are checked for upload.
    pub poll_interval: Duration,
    /// Local copy of the task file.
    pub local_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 21,
            directory: "/".to_string(),
            username: "anonymous".to_string(),
            password: String::new(),
            file_name: crate::sync::facade::DEFAULT_FILE_NAME.to_string(),
            connect_timeout: Duration::from_secs(10),
            poll_interval: crate::sync::facade::DEFAULT_POLL_INTERVAL,
            local_file: std::env::temp_dir().join("taskftp-tasks.xml"),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/taskftp/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. Separate from `load()` so it can be
    /// tested without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            host: cli.host.clone().or_else(|| file.remote.host.clone()),
            port: cli.port.or(file.remote.port).unwrap_or(defaults.port),
            directory: cli
                .directory
                .clone()
                .or_else(|| file.remote.directory.clone())
                .unwrap_or(defaults.directory),
            username: cli
                .user
                .clone()
                .or_else(|| file.remote.username.clone())
                .unwrap_or(defaults.username),
            password: cli
                .password
                .clone()
                .or_else(|| file.remote.password.clone())
                .unwrap_or(defaults.password),
            file_name: file
                .remote
                .file_name
                .clone()
                .unwrap_or(defaults.file_name),
            connect_timeout: file
                .remote
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            poll_interval: file
                .sync
                .poll_interval_secs
                .map_or(defaults.poll_interval, Duration::from_secs),
            local_file: cli
                .local_file
                .clone()
                .or_else(|| file.sync.local_file.clone())
                .unwrap_or(defaults.local_file),
        }
    }

    /// Build a [`SyncConfig`], or `None` when no host is configured.
    #[must_use]
    pub fn to_sync_config(&self) -> Option<SyncConfig> {
        let host = self.host.clone().filter(|h| !h.is_empty())?;
        let endpoint = RemoteEndpoint {
            host,
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            directory: self.directory.clone(),
        };

        let mut config = SyncConfig::new(endpoint, self.local_file.clone());
        config.file_name.clone_from(&self.file_name);
        config.poll_interval = self.poll_interval;
        Some(config)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Keep a task list in sync with a file on an FTP server")]
pub struct CliArgs {
    /// FTP server host name.
    #[arg(long, env = "TASKFTP_HOST")]
    pub host: Option<String>,

    /// FTP control port.
    #[arg(long, env = "TASKFTP_PORT")]
    pub port: Option<u16>,

    /// Remote directory holding the task file.
    #[arg(long, env = "TASKFTP_DIR")]
    pub directory: Option<String>,

    /// FTP user name.
    #[arg(long, env = "TASKFTP_USER")]
    pub user: Option<String>,

    /// FTP password.
    #[arg(long, env = "TASKFTP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Local copy of the task file (default: `$TMPDIR/taskftp-tasks.xml`).
    #[arg(long, env = "TASKFTP_LOCAL_FILE")]
    pub local_file: Option<PathBuf>,

    /// Path to config file (default: `~/.config/taskftp/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKFTP_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskftp.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: `list`).
    #[command(subcommand)]
    pub command: Option<TaskCommand>,
}

/// Task operations offered on the command line.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    /// Show all tasks.
    List {
        /// Print the collection as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create a task.
    Add {
        /// Title of the new task.
        title: String,
    },
    /// Mark a task as done.
    Done {
        /// Task id.
        id: String,
    },
    /// Mark a task as not done.
    Reopen {
        /// Task id.
        id: String,
    },
    /// Delete a task.
    Remove {
        /// Task id.
        id: String,
    },
    /// Change a task's fields.
    Edit {
        /// Task id.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New comment.
        #[arg(long)]
        comment: Option<String>,
        /// Due date as `YYYY-MM-DD`, or `none` to clear it.
        #[arg(long)]
        due: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
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
        config_dir.join("taskftp").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

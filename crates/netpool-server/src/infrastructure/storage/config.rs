//! TOML configuration file for the netpool server binary.
//!
//! One file describes any number of servers.  Every field except `name` and
//! `address` may be omitted:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [[servers]]
//! name = "echo"
//! address = "tcp://127.0.0.1:7878"
//! min_workers = 2
//! max_workers = 16
//! worker_idle_timeout_ms = 15000
//! max_pending_connections = 8
//! busy_message = "Server busy\n"
//! default = true
//! shutdown_mode = "wait_clients"
//!
//! [[servers]]
//! name = "secure"
//! address = "ssl://0.0.0.0:7879"
//!
//! [servers.tls]
//! cert_path = "/etc/netpool/cert.pem"
//! key_path = "/etc/netpool/key.pem"
//! handshake_timeout_ms = 5000
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, so a minimal file only names its
//! servers.  The defaults match [`ServerOptions::default`].
//!
//! Unlike the option values themselves, the file is validated as a whole by
//! [`AppConfig::validate`]: unique names, at most one `default = true`, and
//! every address and limit set must be acceptable to the server engine.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netpool_core::domain::options::{DEFAULT_MAX_WORKERS, DEFAULT_WORKER_IDLE_TIMEOUT};
use netpool_core::{ServerAddress, ServerOptions, StopMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::transport::{TlsSettings, DEFAULT_HANDSHAKE_TIMEOUT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A `[[servers]]` entry is unusable.
    #[error("server '{name}': {reason}")]
    InvalidServer { name: String, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is not set, e.g. `"info"` or
    /// `"netpool_server=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One `[[servers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEntry {
    /// Registry name; must be unique within the file.
    pub name: String,
    /// `tcp://`, `ssl://` or `local://` URI.
    pub address: String,
    #[serde(default)]
    pub min_workers: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    #[serde(default = "default_idle_timeout_ms")]
    pub worker_idle_timeout_ms: u64,
    #[serde(default)]
    pub max_pending_connections: usize,
    /// Overrides the protocol's busy response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_message: Option<String>,
    /// Makes this the registry's default server.
    #[serde(default)]
    pub default: bool,
    /// How this server's sessions are treated on shutdown.
    #[serde(default)]
    pub shutdown_mode: StopMode,
    /// Required for `ssl://` addresses, ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsEntry>,
}

/// Certificate files for an `ssl://` server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsEntry {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_workers() -> u32 {
    DEFAULT_MAX_WORKERS
}
fn default_idle_timeout_ms() -> u64 {
    DEFAULT_WORKER_IDLE_TIMEOUT.as_millis() as u64
}
fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerEntry {
    /// An entry with every limit at its default.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            min_workers: 0,
            max_workers: default_max_workers(),
            worker_idle_timeout_ms: default_idle_timeout_ms(),
            max_pending_connections: 0,
            busy_message: None,
            default: false,
            shutdown_mode: StopMode::default(),
            tls: None,
        }
    }

    /// Parses `address`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidServer`] if the URI is malformed.
    pub fn server_address(&self) -> Result<ServerAddress, ConfigError> {
        ServerAddress::parse(&self.address).map_err(|e| self.invalid(e))
    }

    /// Builds and validates the engine options for this entry.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidServer`] if the limits are out of range.
    pub fn options(&self) -> Result<ServerOptions, ConfigError> {
        let mut options = ServerOptions::default()
            .with_min_workers(self.min_workers)
            .with_max_workers(self.max_workers)
            .with_worker_idle_timeout(Duration::from_millis(self.worker_idle_timeout_ms))
            .with_max_pending_connections(self.max_pending_connections);
        if let Some(message) = &self.busy_message {
            options = options.with_busy_message(message.as_bytes());
        }
        options.validate().map_err(|e| self.invalid(e))?;
        Ok(options)
    }

    /// Loads the certificate files, if this entry has a `[servers.tls]`
    /// table.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidServer`] if the files cannot be loaded.
    pub fn tls_settings(&self) -> Result<Option<TlsSettings>, ConfigError> {
        let Some(tls) = &self.tls else {
            return Ok(None);
        };
        let settings = TlsSettings::from_pem_files(&tls.cert_path, &tls.key_path)
            .map_err(|e| self.invalid(e))?
            .with_handshake_timeout(Duration::from_millis(tls.handshake_timeout_ms));
        Ok(Some(settings))
    }

    fn invalid(&self, reason: impl std::fmt::Display) -> ConfigError {
        ConfigError::InvalidServer {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl AppConfig {
    /// Checks the file as a whole, without touching the certificate files.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidServer`] for the first offending entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut default_seen = false;

        for entry in &self.servers {
            if entry.name.trim().is_empty() {
                return Err(entry.invalid("name must not be empty"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(entry.invalid("duplicate server name"));
            }
            if entry.default {
                if default_seen {
                    return Err(entry.invalid("more than one server is marked default"));
                }
                default_seen = true;
            }

            let address = entry.server_address()?;
            entry.options()?;
            if address.is_encrypted() && entry.tls.is_none() {
                return Err(entry.invalid("ssl:// address requires a [servers.tls] table"));
            }
        }
        Ok(())
    }

    /// The entry marked `default = true`, else the first one.
    pub fn default_server(&self) -> Option<&ServerEntry> {
        self.servers
            .iter()
            .find(|entry| entry.default)
            .or_else(|| self.servers.first())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

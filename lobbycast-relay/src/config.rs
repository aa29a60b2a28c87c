//! Relay settings.
//!
//! A setting given on the command line (or through its `LOBBYCAST_*`
//! environment variable) wins over the TOML file, which wins over the
//! built-in defaults. The file lives at
//! `<config dir>/lobbycast-relay/config.toml` unless `--config` names one:
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//! max_payload_size = 1048576
//! drain_timeout_secs = 5
//!
//! [logging]
//! file = "/var/log/lobbycast-relay.log"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::relay::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_MAX_PAYLOAD_SIZE};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Problems found while assembling the relay settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file exists (or was named explicitly) but is unreadable.
    #[error("cannot read {path}: {source}")]
    ReadFile {
        /// File that was opened.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for this schema.
    #[error("malformed settings file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// `bind_addr` is not an `ip:port` pair.
    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBindAddr {
        /// The rejected address.
        addr: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// A payload limit of zero would reject every frame.
    #[error("max_payload_size must be greater than zero")]
    ZeroPayloadSize,
}

/// On-disk settings. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    server: ServerSection,
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
    drain_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    file: Option<PathBuf>,
}

/// Command line of `lobbycast-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Lobbycast broadcast relay server")]
pub struct RelayCliArgs {
    /// Listen address (`ip:port`) [default: 0.0.0.0:8080].
    #[arg(short, long, env = "LOBBYCAST_ADDR")]
    pub bind: Option<String>,

    /// Settings file to use instead of the per-user one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest accepted message, in bytes [default: 1048576].
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Grace period for clients to disconnect on shutdown, in seconds [default: 5].
    #[arg(long)]
    pub drain_timeout_secs: Option<u64>,

    /// `tracing` filter directive, e.g. `info` or `lobbycast_relay=debug`.
    #[arg(long, default_value = "info", env = "LOBBYCAST_LOG")]
    pub log_level: String,

    /// Append logs to this file as well as stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Largest accepted message in bytes.
    pub max_payload_size: usize,
    /// Shutdown grace period.
    pub drain_timeout: Duration,
    /// `tracing` filter directive.
    pub log_level: String,
    /// Extra log destination.
    pub log_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl RelayConfig {
    /// Builds the settings for `cli`, reading the settings file if there is one.
    ///
    /// A missing per-user file is fine; a missing file named with `--config`
    /// is not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or the
    /// merged settings are invalid.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_settings(path)?,
            None => match default_settings_path() {
                Some(path) => read_settings(&path).or_else(|e| match e {
                    ConfigError::ReadFile { source, .. }
                        if source.kind() == std::io::ErrorKind::NotFound =>
                    {
                        Ok(SettingsFile::default())
                    }
                    other => Err(other),
                })?,
                None => SettingsFile::default(),
            },
        };
        let config = Self::merge(cli, file);
        config.validate()?;
        Ok(config)
    }

    /// The listen address as a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddr`] if it does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                addr: self.bind_addr.clone(),
                source,
            })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::ZeroPayloadSize);
        }
        self.socket_addr().map(drop)
    }

    fn merge(cli: &RelayCliArgs, file: SettingsFile) -> Self {
        let ServerSection {
            bind_addr,
            max_payload_size,
            drain_timeout_secs,
        } = file.server;

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_payload_size: cli
                .max_payload_size
                .or(max_payload_size)
                .unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE),
            drain_timeout: cli
                .drain_timeout_secs
                .or(drain_timeout_secs)
                .map_or(DEFAULT_DRAIN_TIMEOUT, Duration::from_secs),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone().or(file.logging.file),
        }
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lobbycast-relay").join("config.toml"))
}

fn read_settings(path: &Path) -> Result<SettingsFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

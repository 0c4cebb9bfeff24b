//! Node configuration file.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Command-line flags override what the file says.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{EngineOptions, MutationMode};
use crate::server::{Admission, NodeOptions};

/// Settings read from `config.toml`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// HTTP port.
    pub port: u16,
    /// Further ports serving the same routes.
    pub extra_ports: Vec<u16>,
    /// Bind all interfaces instead of loopback.
    pub bindall: bool,
    /// Refuse mutations from clients.
    pub nomutations: bool,
    /// Fraction of requests traced at info level.
    pub trace: f64,
    /// Tracing filter directive.
    pub log_level: String,
    /// Parse timeout in milliseconds.
    pub parse_timeout_ms: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Admission slots; unset means per-CPU default.
    pub max_pending: Option<usize>,
    /// Allowed CORS origins.
    pub allow_origins: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            extra_ports: Vec::new(),
            bindall: false,
            nomutations: false,
            trace: 0.0,
            log_level: "info".to_string(),
            parse_timeout_ms: 1_000,
            request_timeout_ms: 60_000,
            max_pending: None,
            allow_origins: Vec::new(),
        }
    }
}

/// Configuration that could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File is not valid TOML for [`NodeConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// `<config dir>/meridian/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("meridian").join("config.toml"))
}

impl NodeConfig {
    /// Loads `explicit`, or the default path when it exists, or defaults.
    /// An explicit path that does not exist is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => read_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.trace) {
            return Err(ConfigError::Invalid {
                field: "trace",
                message: format!("{} is not within [0, 1]", self.trace),
            });
        }
        if self.parse_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "parse_timeout_ms",
                message: "must be positive".into(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                message: "must be positive".into(),
            });
        }
        if self.max_pending == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_pending",
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Options to boot a node with.
    pub fn node_options(&self) -> NodeOptions {
        let host = if self.bindall {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        NodeOptions {
            host,
            port: self.port,
            extra_ports: self.extra_ports.clone(),
            engine: EngineOptions {
                mutations: if self.nomutations {
                    MutationMode::Disabled
                } else {
                    MutationMode::Allowed
                },
                parse_timeout: Duration::from_millis(self.parse_timeout_ms),
                request_timeout: Duration::from_millis(self.request_timeout_ms),
                trace_ratio: self.trace,
            },
            max_pending: self.max_pending.unwrap_or_else(Admission::default_capacity),
            allow_origins: self.allow_origins.clone(),
        }
    }
}

fn read_file(path: &Path) -> Result<NodeConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

//! Gateway Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file
//! (`fallgate.toml` unless another path is given), then `FALLGATE_`-prefixed
//! environment variables. Nested keys use `__`, e.g.
//! `FALLGATE_INGEST__STALE_AFTER_SECS=10`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fallgate_types::BoardId;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::alert::{StaticDirectory, Subscriber};

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "fallgate.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "FALLGATE_";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Device listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub bind: String,
    /// Silence after which a session may be taken over and a read times out
    pub stale_after_secs: u64,
    pub max_line_bytes: usize,
    /// Forward `RESOLVED` notices to the board's control socket
    pub forward_resolutions: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9000".to_string(),
            stale_after_secs: 5,
            max_line_bytes: 512,
            forward_resolutions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Unacknowledged events expire after this many seconds
    pub event_ttl_secs: u64,
    /// Accept acknowledgments for logged alerts on stdin
    pub console_acks: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            event_ttl_secs: 30,
            console_acks: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file; events are kept in memory when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Sessions seen within this window are reported
    pub window_secs: u64,
    /// Seconds between status log lines; 0 disables
    pub log_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            window_secs: 120,
            log_interval_secs: 60,
        }
    }
}

/// One `[[subscribers]]` roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberEntry {
    pub board: String,
    pub chat_id: i64,
    pub username: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub ingest: IngestConfig,
    pub alerts: AlertsConfig,
    pub storage: StorageConfig,
    pub status: StatusConfig,
    pub subscribers: Vec<SubscriberEntry>,
}

impl GatewayConfig {
    /// Load defaults, the config file and the environment
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::Missing(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let figment = Self::defaults()
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Figment seeded with the built-in defaults
    pub fn defaults() -> Figment {
        Figment::from(Serialized::defaults(GatewayConfig::default()))
    }

    /// Extract and validate
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: GatewayConfig = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.ingest.stale_after_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "ingest.stale_after_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.ingest.max_line_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "ingest.max_line_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.alerts.event_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "alerts.event_ttl_secs",
                reason: "must be greater than zero".into(),
            });
        }

        self.directory().map(|_| ())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.ingest.bind.parse().map_err(|e| ConfigError::Invalid {
            field: "ingest.bind",
            reason: format!("{:?}: {}", self.ingest.bind, e),
        })
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.ingest.stale_after_secs)
    }

    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.alerts.event_ttl_secs)
    }

    pub fn status_window(&self) -> Duration {
        Duration::from_secs(self.status.window_secs)
    }

    /// `None` when periodic status logging is disabled
    pub fn status_interval(&self) -> Option<Duration> {
        match self.status.log_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Subscriber roster from the `[[subscribers]]` entries
    pub fn directory(&self) -> Result<StaticDirectory, ConfigError> {
        let mut directory = StaticDirectory::new();
        for entry in &self.subscribers {
            let board = BoardId::new(entry.board.as_str()).ok_or_else(|| ConfigError::Invalid {
                field: "subscribers.board",
                reason: format!("{:?} is not a valid board id", entry.board),
            })?;
            directory.subscribe(
                board,
                Subscriber {
                    chat_id: entry.chat_id,
                    username: entry.username.clone(),
                },
            );
        }
        Ok(directory)
    }
}

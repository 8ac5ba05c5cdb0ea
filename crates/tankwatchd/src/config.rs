//! Daemon configuration.
//!
//! Configuration is loaded once at startup from a TOML file (every key is
//! optional and falls back to its default) and then validated. Nothing
//! here is mutable at runtime; an invalid configuration is fatal.
//!
//! ```toml
//! [server]
//! host = "localhost"
//! port = 8765
//!
//! [poll]
//! interval_ms = 1000
//! idle = "refresh"
//!
//! [hook]
//! retry_interval_ms = 500
//! max_attempts = 5
//!
//! [layout]
//! lives = 0x91D281FF
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tankwatch_core::{LayoutError, MemoryLayout};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "TANKWATCH_CONFIG";

/// Default WebSocket host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 8765;

/// Default broadcast period.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default delay between hook attempts.
pub const DEFAULT_HOOK_RETRY_INTERVAL_MS: u64 = 500;

/// Default hook attempts per refresh before reporting failure.
pub const DEFAULT_HOOK_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Configuration Sections
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub poll: PollConfig,
    pub hook: HookConfig,
    pub layout: MemoryLayout,
}

/// WebSocket endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    /// Port 0 binds an ephemeral port
    pub port: u16,
    /// Upper bound on the WebSocket opening handshake
    pub handshake_timeout_ms: u64,
    /// Upper bound on a single frame send to one subscriber
    pub send_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            handshake_timeout_ms: 5_000,
            send_timeout_ms: 2_000,
        }
    }
}

impl ServerConfig {
    /// Returns the `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// What the scheduler does on a tick with no subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Refresh anyway so the hook stays warm
    #[default]
    Refresh,
    /// Skip the refresh until someone subscribes
    Skip,
}

/// Broadcast loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub idle: IdlePolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle: IdlePolicy::default(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Hook acquisition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    pub retry_interval_ms: u64,
    pub max_attempts: u32,
    /// Process names (prefix of `comm`) that identify the emulator
    pub process_names: Vec<String>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_HOOK_RETRY_INTERVAL_MS,
            max_attempts: DEFAULT_HOOK_MAX_ATTEMPTS,
            process_names: vec!["dolphin-emu".to_string(), "Dolphin".to_string()],
        }
    }
}

impl HookConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl Config {
    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolves which file to load, if any.
    ///
    /// Order: explicit path, then `$TANKWATCH_CONFIG`, then
    /// `<config_dir>/tankwatch/config.toml` when it exists.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("tankwatch").join("config.toml"))
            .filter(|path| path.exists())
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks every value that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server.host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.server.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.send_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.server.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "server.handshake_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.hook.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "hook.max_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.hook.process_names.iter().all(|n| n.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "hook.process_names",
                reason: "at least one non-empty name is required".to_string(),
            });
        }
        self.layout.validate()?;
        Ok(())
    }
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid memory layout: {0}")]
    Layout(#[from] LayoutError),
}

//! # Engine Configuration
//!
//! Configuration management for the coordination engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TAVOLA_DB_PATH=/srv/tavola/tavola.db                               │
//! │     TAVOLA_STOCK_AFFECTING_STATUS=billed                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tavola-engine/engine.toml (Linux)                        │
//! │     ~/Library/Application Support/com.tavola.engine/engine.toml       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     deduct on served, last write wins, 256-slot subscriber queues     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [database]
//! path = "/srv/tavola/tavola.db"
//! max_connections = 5
//! busy_timeout_ms = 5000              # how long a writer waits for the lock
//!
//! [orders]
//! stock_affecting_status = "served"   # served | billed
//! free_table_on_last_cancel = true
//! concurrency = "last_write_wins"     # last_write_wins | version_checked
//!
//! [bus]
//! capacity = 256
//!
//! [relay]
//! poll_interval_ms = 250
//! batch_size = 200
//! retain_published_secs = 86400
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tavola_core::{ConcurrencyPolicy, StockAffectingStatus};
use tavola_db::DbConfig;
use tavola_sync::RelayConfig;

use crate::error::{EngineError, EngineResult};

const DB_FILE_NAME: &str = "tavola.db";
const CONFIG_FILE_NAME: &str = "engine.toml";

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSettings {
    /// Status whose arrival deducts inventory.
    #[serde(default)]
    pub stock_affecting_status: StockAffectingStatus,

    /// Empty the table when its last open order is cancelled.
    #[serde(default = "default_true")]
    pub free_table_on_last_cancel: bool,

    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
}

fn default_true() -> bool {
    true
}

impl Default for OrderSettings {
    fn default() -> Self {
        OrderSettings {
            stock_affecting_status: StockAffectingStatus::default(),
            free_table_on_last_cancel: true,
            concurrency: ConcurrencyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSettings {
    /// Per-subscriber queue length.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    tavola_sync::DEFAULT_CAPACITY
}

impl Default for BusSettings {
    fn default() -> Self {
        BusSettings {
            capacity: default_bus_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_relay_batch_size")]
    pub batch_size: i64,

    #[serde(default = "default_retain_published_secs")]
    pub retain_published_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    250
}
fn default_relay_batch_size() -> i64 {
    200
}
fn default_retain_published_secs() -> u64 {
    24 * 60 * 60
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_relay_batch_size(),
            retain_published_secs: default_retain_published_secs(),
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub orders: OrderSettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub relay: RelaySettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a config document. Missing sections and keys take defaults.
    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.bus.capacity == 0 {
            return Err(EngineError::Config(
                "bus.capacity must be greater than 0".into(),
            ));
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "relay.poll_interval_ms must be greater than 0".into(),
            ));
        }

        self.relay_config().validate()?;
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TAVOLA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(status) = std::env::var("TAVOLA_STOCK_AFFECTING_STATUS") {
            match status.parse() {
                Ok(parsed) => {
                    debug!(status = %status, "Overriding stock-affecting status from environment");
                    self.orders.stock_affecting_status = parsed;
                }
                Err(e) => warn!(status = %status, error = %e, "Ignoring stock-affecting status from environment"),
            }
        }

        if let Ok(policy) = std::env::var("TAVOLA_CONCURRENCY") {
            match policy.parse() {
                Ok(parsed) => self.orders.concurrency = parsed,
                Err(e) => warn!(policy = %policy, error = %e, "Ignoring concurrency policy from environment"),
            }
        }

        if let Ok(capacity) = std::env::var("TAVOLA_BUS_CAPACITY") {
            if let Ok(c) = capacity.parse::<usize>() {
                self.bus.capacity = c;
            }
        }

        if let Ok(ms) = std::env::var("TAVOLA_RELAY_POLL_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.relay.poll_interval_ms = ms;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tavola", "engine")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Database file: the configured path, or `tavola.db` in the platform
    /// data directory (created if missing).
    pub fn database_path(&self) -> EngineResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("com", "tavola", "engine")
            .ok_or_else(|| EngineError::Config("Could not determine app data directory".into()))?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join(DB_FILE_NAME))
    }

    pub fn db_config(&self) -> EngineResult<DbConfig> {
        Ok(DbConfig::new(self.database_path()?)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms)))
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.relay.poll_interval_ms),
            batch_size: self.relay.batch_size,
            retain_published: Duration::from_secs(self.relay.retain_published_secs),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.orders.stock_affecting_status, StockAffectingStatus::Served);
        assert_eq!(config.orders.concurrency, ConcurrencyPolicy::LastWriteWins);
        assert!(config.orders.free_table_on_last_cancel);
        assert_eq!(config.bus.capacity, 256);
        assert_eq!(config.relay.poll_interval_ms, 250);
        assert_eq!(config.relay.batch_size, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [orders]
            stock_affecting_status = "billed"
            concurrency = "version_checked"
            "#,
        )
        .unwrap();

        assert_eq!(config.orders.stock_affecting_status, StockAffectingStatus::Billed);
        assert_eq!(config.orders.concurrency, ConcurrencyPolicy::VersionChecked);
        assert!(config.orders.free_table_on_last_cancel);
        assert_eq!(config.relay, RelaySettings::default());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result = EngineConfig::from_toml(
            r#"
            [orders]
            stock_affecting_status = "ready"
            "#,
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.bus.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.relay.batch_size = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_explicit_database_path() {
        let config = EngineConfig::from_toml(
            r#"
            [database]
            path = "/tmp/tavola-test.db"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/tavola-test.db")
        );
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_busy_timeout_reaches_db_config() {
        let config = EngineConfig::from_toml(
            r#"
            [database]
            path = "/tmp/tavola-test.db"
            busy_timeout_ms = 750
            "#,
        )
        .unwrap();
        let db_config = config.db_config().unwrap();
        assert_eq!(db_config.busy_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[orders]"));
        assert!(toml_str.contains("[relay]"));
    }
}

//! Configuration management for groundlink.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::decoder::MissionTimeUnit;
use crate::error::{Error, Result};
use crate::validator::{PhysicalLimits, ValidationPolicy};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "groundlink";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "telemetry.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GROUNDLINK_`, sections split on `__`)
/// 2. TOML config file at `~/.config/groundlink/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Line framing configuration.
    pub framer: FramerConfig,
    /// Packet decoding configuration.
    pub decoder: DecoderConfig,
    /// Packet validation configuration.
    pub validation: ValidationConfig,
    /// Link liveness configuration.
    pub links: LinkConfig,
    /// Batching configuration.
    pub buffer: BufferConfig,
    /// Status display configuration.
    pub display: DisplayConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/groundlink/telemetry.db`
    pub database_path: Option<PathBuf>,
    /// Rows fetched per page when streaming stored records.
    pub stream_page_size: usize,
}

/// Byte stream framing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Maximum bytes held while waiting for a line delimiter.
    pub max_buffer_len: usize,
    /// Bytes requested per transport read.
    pub read_chunk_size: usize,
}

/// Packet decoding configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// How the raw mission time field is interpreted.
    pub mission_time_unit: MissionTimeUnit,
}

/// Packet validation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Which checks decoded packets must pass.
    pub policy: ValidationPolicy,
    /// Ranges enforced by the `physical_limits` policy.
    pub limits: PhysicalLimits,
}

/// Link liveness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Interval between liveness recomputations in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a link is considered inactive, in milliseconds.
    pub timeout_ms: u64,
}

/// Batching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Records per batch that trigger an immediate flush.
    pub batch_size: usize,
    /// Maximum time a partial batch waits before being flushed, in milliseconds.
    pub flush_interval_ms: u64,
    /// Queued batch count above which a backlog warning is logged.
    pub backlog_warn_threshold: usize,
    /// Capacity of the persistence event channel.
    pub event_capacity: usize,
}

/// Status display configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Status line refresh rate in Hz. Set to 0 to disable.
    pub refresh_hz: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            stream_page_size: 512,
        }
    }
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_buffer_len: 4096,
            read_chunk_size: 1024,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 500,
            timeout_ms: 2000,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            flush_interval_ms: 1000,
            backlog_warn_threshold: 16,
            event_capacity: 64,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { refresh_hz: 2 }
    }
}

impl Config {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// `config_path` replaces the default file location when given.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("GROUNDLINK_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.framer.max_buffer_len == 0 {
            return Err(Error::config("framer.max_buffer_len must be greater than 0"));
        }

        // One read must fit in the framer buffer
        if self.framer.read_chunk_size == 0
            || self.framer.read_chunk_size >= self.framer.max_buffer_len
        {
            return Err(Error::config(format!(
                "framer.read_chunk_size ({}) must be between 1 and max_buffer_len ({})",
                self.framer.read_chunk_size, self.framer.max_buffer_len
            )));
        }

        if self.links.heartbeat_interval_ms == 0 {
            return Err(Error::config(
                "links.heartbeat_interval_ms must be greater than 0",
            ));
        }

        if self.links.timeout_ms == 0 {
            return Err(Error::config("links.timeout_ms must be greater than 0"));
        }

        if self.buffer.batch_size == 0 {
            return Err(Error::config("buffer.batch_size must be greater than 0"));
        }

        if self.buffer.flush_interval_ms == 0 {
            return Err(Error::config(
                "buffer.flush_interval_ms must be greater than 0",
            ));
        }

        if self.buffer.event_capacity == 0 {
            return Err(Error::config("buffer.event_capacity must be greater than 0"));
        }

        if self.storage.stream_page_size == 0 {
            return Err(Error::config(
                "storage.stream_page_size must be greater than 0",
            ));
        }

        self.validation.limits.validate()?;

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the heartbeat tick interval as a Duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.links.heartbeat_interval_ms)
    }

    /// Get the link timeout as a Duration.
    #[must_use]
    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.links.timeout_ms)
    }

    /// Get the batch flush interval as a Duration.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.buffer.flush_interval_ms)
    }

    /// Get the status display period, or `None` when the display is disabled.
    #[must_use]
    pub fn display_period(&self) -> Option<Duration> {
        if self.display.refresh_hz == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / self.display.refresh_hz)
        }
    }
}

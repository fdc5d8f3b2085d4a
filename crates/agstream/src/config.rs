//! Bridge configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `AGSTREAM__*` environment variables (`__` separates nesting levels, e.g.
//! `AGSTREAM__PUBLISHER__CAPACITY=64`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Application name used for the config directory.
pub const APP_NAME: &str = "agstream";

/// Default publisher buffer, in events.
pub const DEFAULT_CAPACITY: usize = 256;

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "AGSTREAM";

/// What the publisher does when its buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room.
    #[default]
    Block,
    /// Evict the oldest undelivered event; the producer never waits.
    DropOldest,
}

/// How tool call argument fragments reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgsMode {
    /// One `tool-call-args-delta` per upstream fragment.
    #[default]
    Stream,
    /// A single `tool-call-args-delta` with the full arguments, at tool call end.
    Coalesce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Events buffered between producer and consumer. Must be > 0.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub args_mode: ArgsMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `agstream=debug`, ...). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgstreamConfig {
    pub publisher: PublisherConfig,
    pub converter: ConverterConfig,
    pub logging: LoggingConfig,
}

impl AgstreamConfig {
    /// Load configuration from `path` (required to exist) or, when `None`,
    /// from the default location if present.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let file = match path {
            Some(path) => Some(File::from(path).format(FileFormat::Toml).required(true)),
            None => default_config_path()
                .map(|path| File::from(path).format(FileFormat::Toml).required(false)),
        };

        let mut builder = Config::builder()
            .set_default("publisher.capacity", DEFAULT_CAPACITY as i64)?
            .set_default("publisher.overflow", "block")?
            .set_default("converter.args_mode", "stream")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;

        if let Some(file) = file {
            builder = builder.add_source(file);
        }

        let built = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.publisher.capacity == 0 {
            return Err(BridgeError::InvalidConfig(
                "publisher.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `~/.config/agstream/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

//! # Configuration
//!
//! TOML configuration for the `gsmlink` tool and for embedding the engine.
//!
//! ```toml
//! [modem]
//! port = "/dev/ttyS1"
//! baud_rate = 115200
//! command_timeout_ms = 5000
//! guard_interval_ms = 100
//!
//! [logging]
//! level = "info"
//! file = "gsmlink.log"
//! ```
//!
//! Every `[modem]` tuning field is optional; [`ModemConfig::engine_settings`]
//! fills in the defaults and clamps out-of-range values.
//!
//! ```rust,no_run
//! use gsmlink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let settings = config.modem.engine_settings();
//!     println!("{} @ {} baud, guard {:?}", config.modem.port, config.modem.baud_rate, settings.guard_interval);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::modem::settings::{EngineSettings, MAX_POLL_INTERVAL, MIN_POLL_INTERVAL};

/// Default power key pulse (SIM800-class modules want at least one second).
pub const DEFAULT_POWER_PULSE_MS: u64 = 1200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub modem: ModemConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Per-command deadline (ms) when the caller does not pick one.
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,
    /// Minimum spacing between two commands (ms). At least 1.
    #[serde(default)]
    pub guard_interval_ms: Option<u64>,
    /// Reader idle poll (ms), clamped to 20..=100.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub buffer_capacity: Option<usize>,
    #[serde(default)]
    pub response_capacity: Option<usize>,
    #[serde(default)]
    pub urc_capacity: Option<usize>,
    /// How long a URC consumer may hold the mailbox (ms).
    #[serde(default)]
    pub urc_release_timeout_ms: Option<u64>,
    #[serde(default)]
    pub power_pulse_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl ModemConfig {
    /// Engine tuning with defaults applied and values clamped to what the
    /// engine can work with.
    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        let ms = Duration::from_millis;
        EngineSettings {
            command_timeout: self
                .command_timeout_ms
                .map_or(defaults.command_timeout, ms),
            guard_interval: self
                .guard_interval_ms
                .map_or(defaults.guard_interval, |v| ms(v.max(1))),
            poll_interval: self
                .poll_interval_ms
                .map_or(defaults.poll_interval, |v| {
                    ms(v).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
                }),
            buffer_capacity: self
                .buffer_capacity
                .filter(|&v| v > 0)
                .unwrap_or(defaults.buffer_capacity),
            response_capacity: self
                .response_capacity
                .filter(|&v| v > 0)
                .unwrap_or(defaults.response_capacity),
            urc_capacity: self
                .urc_capacity
                .filter(|&v| v > 0)
                .unwrap_or(defaults.urc_capacity),
            urc_release_timeout: self
                .urc_release_timeout_ms
                .map_or(defaults.urc_release_timeout, ms),
        }
    }

    pub fn power_pulse(&self) -> Duration {
        Duration::from_millis(self.power_pulse_ms.unwrap_or(DEFAULT_POWER_PULSE_MS))
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Config {
            modem: ModemConfig {
                port: "/dev/ttyS1".to_string(),
                baud_rate: 115200,
                command_timeout_ms: Some(settings.command_timeout.as_millis() as u64),
                guard_interval_ms: Some(settings.guard_interval.as_millis() as u64),
                poll_interval_ms: Some(settings.poll_interval.as_millis() as u64),
                buffer_capacity: Some(settings.buffer_capacity),
                response_capacity: Some(settings.response_capacity),
                urc_capacity: Some(settings.urc_capacity),
                urc_release_timeout_ms: Some(settings.urc_release_timeout.as_millis() as u64),
                power_pulse_ms: Some(DEFAULT_POWER_PULSE_MS),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

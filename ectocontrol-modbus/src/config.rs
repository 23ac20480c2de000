//! Configuration for the adapter client.

use ectocontrol_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::coordinator::{BACKOFF_STEP, PollSettings};
use crate::transport::MAX_SLAVE_ID;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] ectocontrol_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter connection and polling settings
    pub device: DeviceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the adapter on the serial line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in logs and diagnostics)
    #[serde(default = "default_name")]
    pub name: String,

    /// Serial port path, e.g. "/dev/ttyUSB0"
    pub port: String,

    /// Modbus slave ID (1-32)
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Poll interval in seconds (5-300)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Retries after a failed read (0-10)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Read registers one at a time instead of as one block
    #[serde(default)]
    pub sequential_reads: bool,

    /// Per-transaction timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Failed cycles before the device is reported unavailable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_name() -> String {
    "ectocontrol".to_string()
}

fn default_slave_id() -> u8 {
    1
}

fn default_poll_interval() -> u64 {
    15
}

fn default_retry_count() -> u32 {
    3
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    3
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Polling parameters derived from this config.
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            name: self.name.clone(),
            interval: Duration::from_secs(self.poll_interval_secs),
            retry_count: self.retry_count,
            sequential: self.sequential_reads,
            read_timeout: self.read_timeout(),
            failure_threshold: self.failure_threshold,
            backoff_step: BACKOFF_STEP,
        }
    }
}

impl AdapterConfig {
    /// Defaults for running against the in-memory adapter.
    pub fn simulated() -> Self {
        Self {
            device: DeviceConfig {
                name: default_name(),
                port: "memory".to_string(),
                slave_id: default_slave_id(),
                poll_interval_secs: default_poll_interval(),
                retry_count: default_retry_count(),
                sequential_reads: false,
                read_timeout_ms: default_read_timeout(),
                failure_threshold: default_failure_threshold(),
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a JSON5 file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = ectocontrol_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = ectocontrol_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let device = &self.device;

        if device.name.is_empty() {
            return Err(ConfigError::Validation(
                "Device name cannot be empty".to_string(),
            ));
        }

        if device.port.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "Device '{}': port cannot be empty",
                device.name
            )));
        }

        if device.slave_id == 0 || device.slave_id > MAX_SLAVE_ID {
            return Err(ConfigError::Validation(format!(
                "Device '{}': slave_id must be 1-{}",
                device.name, MAX_SLAVE_ID
            )));
        }

        if !(5..=300).contains(&device.poll_interval_secs) {
            return Err(ConfigError::Validation(format!(
                "Device '{}': poll_interval_secs must be 5-300",
                device.name
            )));
        }

        if device.retry_count > 10 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': retry_count must be 0-10",
                device.name
            )));
        }

        if device.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': read_timeout_ms must be positive",
                device.name
            )));
        }

        if device.failure_threshold == 0 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': failure_threshold must be at least 1",
                device.name
            )));
        }

        Ok(())
    }
}

//! Host configuration using Figment.
//!
//! Configuration is layered, later layers overriding earlier ones:
//! 1. library defaults ([`MdaConfig::default`])
//! 2. a TOML file
//! 3. environment variables prefixed with `MDA_`, nested keys separated by a
//!    double underscore (`MDA_TIMEOUTS__SET_MS=2000`)
//!
//! # Example
//!
//! ```toml
//! log_level = "debug"
//! log_format = "compact"
//! driver_paths = ["drivers"]
//!
//! [timeouts]
//! set_ms = 2000
//!
//! [[devices]]
//! id = 1
//! name = "Bench stage"
//! device_type = "example"
//! args = { com_port = "COM1" }
//! ```

use crate::record::DeviceRecord;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mda_core::{MdaError, MdaResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MDA_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Default bounds for suspending operations, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub get_ms: u64,
    pub set_ms: u64,
    pub acquire_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            get_ms: 1_000,
            set_ms: 5_000,
            acquire_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn get(&self) -> Duration {
        Duration::from_millis(self.get_ms)
    }

    pub fn set(&self) -> Duration {
        Duration::from_millis(self.set_ms)
    }

    pub fn acquire(&self) -> Duration {
        Duration::from_millis(self.acquire_ms)
    }
}

/// Top-level host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdaConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Directories scanned for driver manifests
    pub driver_paths: Vec<PathBuf>,
    pub timeouts: TimeoutConfig,
    /// Persisted device records
    pub devices: Vec<DeviceRecord>,
}

impl Default for MdaConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            driver_paths: Vec::new(),
            timeouts: TimeoutConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl MdaConfig {
    /// Figment with defaults, `path` (if it exists) and environment overrides.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(MdaConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate.
    pub fn load(path: Option<&Path>) -> MdaResult<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// Load from a TOML string without consulting the environment.
    pub fn from_toml_str(content: &str) -> MdaResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(MdaConfig::default())).merge(Toml::string(content)),
        )
    }

    fn from_figment(figment: Figment) -> MdaResult<Self> {
        let config: MdaConfig = figment
            .extract()
            .map_err(|e| MdaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> MdaResult<()> {
        let level = self.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(MdaError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let timeouts = &self.timeouts;
        if timeouts.get_ms == 0 || timeouts.set_ms == 0 || timeouts.acquire_ms == 0 {
            return Err(MdaError::Config("timeouts must be greater than zero".to_string()));
        }

        let mut ids = HashSet::new();
        for record in &self.devices {
            if !ids.insert(record.id) {
                return Err(MdaError::Config(format!("Duplicate device id: {}", record.id)));
            }
            if record.device_type.trim().is_empty() {
                return Err(MdaError::Config(format!(
                    "Device {} has an empty device_type",
                    record.id
                )));
            }
        }
        Ok(())
    }
}

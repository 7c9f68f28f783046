//! Configuration management for the magnet node.
//!
//! This module provides TOML-based configuration with support for multiple
//! configuration sources (default, file-based, environment variables) and
//! validation of configuration parameters.

use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "magnet.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "MAGNET";

/// Complete configuration for a magnet node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MagnetConfig {
    /// Interface and listener configuration
    pub network: NetworkConfig,
    /// Discovery pass tuning
    pub discovery: DiscoveryConfig,
    /// Request header defaults
    pub protocol: ProtocolConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Interface and listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Interface whose subnet is scanned
    pub interface: String,
    /// Port peers listen on, and the port probed on every candidate
    pub port: u16,
    /// Display name advertised in handshake responses, the machine
    /// hostname when unset
    pub hostname: Option<String>,
    /// Address the responder binds to
    pub bind_address: IpAddr,
}

/// Discovery pass tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Size of the first probe batch; each following batch doubles it
    pub batch_limit: usize,
    /// Upper bound on a single request, connect included
    pub probe_timeout_ms: u64,
    /// Delay between discovery passes in `run`
    pub interval_secs: u64,
}

/// Request header defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// User agent sent with every request
    pub user_agent: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: crate::defaults::DEFAULT_INTERFACE.to_string(),
            port: crate::defaults::DEFAULT_PORT,
            hostname: None,
            bind_address: IpAddr::from([0, 0, 0, 0]),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_limit: crate::defaults::DEFAULT_BATCH_LIMIT,
            probe_timeout_ms: crate::defaults::DEFAULT_PROBE_TIMEOUT_MS,
            interval_secs: 30,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::defaults::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Name the responder advertises: the configured one, else the machine's
    pub fn advertised_hostname(&self) -> Option<String> {
        self.hostname.clone().or_else(machine_hostname)
    }
}

fn machine_hostname() -> Option<String> {
    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy().trim().to_string();
            (!name.is_empty()).then_some(name)
        }
        Err(e) => {
            log::warn!("Cannot read machine hostname: {}", e);
            None
        }
    }
}

impl DiscoveryConfig {
    /// Probe timeout as a [`Duration`]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Rediscovery interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MagnetConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, does not parse, carries an
    /// unknown key, or fails validation
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            if path.exists() {
                config = Self::from_file(path)?;
            } else {
                return Err(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
                .into());
            }
        } else {
            let default_locations = [
                PathBuf::from(DEFAULT_CONFIG_FILE),
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("magnet")
                    .join(DEFAULT_CONFIG_FILE),
            ];

            for location in &default_locations {
                if location.exists() {
                    config = Self::from_file(location)?;
                    break;
                }
            }
        }

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Apply `MAGNET_*` environment overrides
    fn merge_from_env(mut self) -> Result<Self> {
        if let Ok(interface) = std::env::var(format!("{ENV_PREFIX}_NETWORK_INTERFACE")) {
            self.network.interface = interface;
        }

        if let Ok(port) = std::env::var(format!("{ENV_PREFIX}_NETWORK_PORT")) {
            self.network.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{ENV_PREFIX}_NETWORK_PORT"),
                value: port,
            })?;
        }

        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.network.port == 0 {
            return Err(invalid("network.port", "0"));
        }

        if self.network.interface.trim().is_empty() {
            return Err(invalid("network.interface", ""));
        }

        if self.discovery.batch_limit == 0 {
            return Err(invalid("discovery.batch_limit", "0"));
        }

        if self.discovery.probe_timeout_ms == 0 {
            return Err(invalid("discovery.probe_timeout_ms", "0"));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(invalid("logging.level", other)),
        }

        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn invalid(field: &str, value: &str) -> crate::utils::MagnetError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

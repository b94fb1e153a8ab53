//! Client configuration
//!
//! A single JSON file; every field is optional and falls back to its
//! default, so an absent file means a default configuration.

use crate::crypto::Network;
use crate::fault::{Fault, FaultCode};
use crate::network::MonitorConfig;
use crate::vault::{KdfParams, VaultConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file looked up in the working directory by default
pub const DEFAULT_CONFIG_FILE: &str = "wallet-client.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

impl Fault for ConfigError {
    fn code(&self) -> FaultCode {
        match self {
            ConfigError::Io(_) => FaultCode::Unexpected,
            ConfigError::Parse(_) | ConfigError::Invalid(_) => FaultCode::InvalidParameter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Directory holding the wallet containers
    pub data_dir: PathBuf,
    pub network: Network,
    /// Base URL of the node's HTTP API
    pub node_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Failed polls before the node counts as unavailable
    pub failure_threshold: u32,
    pub kdf: KdfParams,
    /// Port of the local REST API
    pub api_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".wallet_data"),
            network: Network::Mainnet,
            node_url: "http://127.0.0.1:7890".to_string(),
            request_timeout_secs: 10,
            poll_interval_secs: 5,
            failure_threshold: 3,
            kdf: KdfParams::default(),
            api_port: 7777,
        }
    }
}

impl ClientConfig {
    /// Read `path`, or the defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match fs::read_to_string(path) {
            Ok(content) => {
                log::info!("Loading configuration from {}", path.display());
                serde_json::from_str(&content)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No configuration at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(config: &Self) -> Result<(), ConfigError> {
        if config.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".into()));
        }
        if config.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        if config.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure_threshold must be positive".into()));
        }
        if config.node_url.is_empty() {
            return Err(ConfigError::Invalid("node_url is empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            data_dir: self.data_dir.clone(),
            network: self.network,
            kdf: self.kdf,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            failure_threshold: self.failure_threshold,
            request_timeout: self.request_timeout(),
        }
    }
}

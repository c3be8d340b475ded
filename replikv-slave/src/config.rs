use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core::KVConfig;
use crate::replication::{FailoverConfig, ReplicationConfig};

/// Main slave configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    pub server: Server,
    pub kv_store: KVConfig,
    pub replication: ReplicationConfig,
    pub failover: FailoverConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 15600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid {section} config: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

impl SlaveConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: SlaveConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values the slave cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                section: "server",
                reason: "host must not be empty".to_string(),
            });
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                section: "server",
                reason: "port must be greater than 0".to_string(),
            });
        }

        self.replication
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                section: "replication",
                reason,
            })?;
        self.failover
            .give_up
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                section: "failover",
                reason,
            })?;

        match self.logging.format.as_str() {
            "json" | "plain" => Ok(()),
            other => Err(ConfigError::Invalid {
                section: "logging",
                reason: format!("unknown format '{}' (expected json or plain)", other),
            }),
        }
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

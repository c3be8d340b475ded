use super::types::MasterTarget;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Master host name or IP
    pub master_host: String,

    /// Master replication port
    pub master_port: u16,

    /// First reconnect delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Every failed reconnect multiplies the delay by this factor
    pub backoff_growth_factor: f64,

    /// Upper bound for the reconnect delay in milliseconds
    pub backoff_cap_ms: u64,

    /// Timeout for a single connection attempt
    pub connect_timeout_ms: u64,

    /// Master is considered gone if no frame arrives within this window
    pub heartbeat_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            master_host: "127.0.0.1".to_string(),
            master_port: 15501,
            initial_backoff_ms: 100,
            backoff_growth_factor: 2.0,
            backoff_cap_ms: 1000 * 60 * 2, // 2 minutes
            connect_timeout_ms: 5000,
            heartbeat_timeout_ms: 30_000,
        }
    }
}

impl ReplicationConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.master_host.trim().is_empty() {
            return Err("master_host must not be empty".to_string());
        }
        if self.master_port == 0 {
            return Err("master_port must be a positive integer".to_string());
        }
        if self.initial_backoff_ms == 0 {
            return Err("initial_backoff_ms must be greater than zero".to_string());
        }
        if self.backoff_cap_ms < self.initial_backoff_ms {
            return Err(format!(
                "backoff_cap_ms ({}) must not be below initial_backoff_ms ({})",
                self.backoff_cap_ms, self.initial_backoff_ms
            ));
        }
        if self.backoff_growth_factor.is_nan() || self.backoff_growth_factor < 1.0 {
            return Err("backoff_growth_factor must be >= 1.0".to_string());
        }
        Ok(())
    }

    pub fn target(&self) -> MasterTarget {
        MasterTarget::new(self.master_host.clone(), self.master_port)
    }

    /// Replace the master this slave follows
    pub fn set_target(&mut self, target: MasterTarget) {
        self.master_host = target.host;
        self.master_port = target.port;
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Failover behaviour while the master is unreachable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Accept reads and writes locally while failed over
    pub serve_queries_while_failed_over: bool,

    /// Executable run with `down` on failure and `up` on resume
    pub recovery_script: Option<PathBuf>,

    pub give_up: GiveUpConfig,
}

/// Upper bound for `give_up.max_reconnects`
pub const MAX_RECONNECTS_LIMIT: usize = 10_000;

/// When to stop reconnecting to a flapping master
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GiveUpConfig {
    pub enabled: bool,

    /// Sliding window for counting reconnects
    pub window_secs: u64,

    /// Reconnects inside the window that make us give up
    pub max_reconnects: usize,
}

impl Default for GiveUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 5 * 60,
            max_reconnects: 5,
        }
    }
}

impl GiveUpConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.window_secs == 0 {
            return Err("give_up.window_secs must be greater than zero".to_string());
        }
        if self.max_reconnects == 0 {
            return Err("give_up.max_reconnects must be at least 1".to_string());
        }
        if self.max_reconnects > MAX_RECONNECTS_LIMIT {
            return Err(format!(
                "give_up.max_reconnects must not exceed {}",
                MAX_RECONNECTS_LIMIT
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

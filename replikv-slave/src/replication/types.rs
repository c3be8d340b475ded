use crate::core::types::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Address of the master node the slave replicates from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterTarget {
    pub host: String,
    pub port: u16,
}

impl MasterTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for MasterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Whether the local node answers queries as a replica or on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingMode {
    /// Connected to the master, serving as a read-only replica
    Responding,
    /// Out of contact with the master
    FailedOver,
}

/// Position of the replication link in the failover state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Waiting for (or performing) a connection attempt
    Retrying,
    /// Streaming operations from the master
    Connected,
    /// Connection lost, retry not yet scheduled
    FailedOver,
    /// Too many reconnects; waits for an operator command
    GivenUp,
}

/// Replication command (exchanged between master and slave)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicationCommand {
    /// First frame sent by the slave after connecting
    Handshake { replica_id: String, offset: u64 },

    /// Single operation replication
    Operation(ReplicationOperation),

    /// Heartbeat - keep connection alive, measure lag
    Heartbeat { master_offset: u64, timestamp: u64 },
}

/// Operation to be replicated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationOperation {
    pub offset: u64,
    pub timestamp: u64,
    pub operation: Operation,
}

/// What a master link hands to the run loop
#[derive(Debug, Clone)]
pub enum MasterEvent {
    /// Operation to apply to the local store
    Operation(ReplicationOperation),
    /// Master's current write offset
    Heartbeat { master_offset: u64 },
}

/// Snapshot of the failover state, reported to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverStatus {
    pub state: LinkState,
    pub serving_mode: ServingMode,
    pub master: MasterTarget,
    pub backoff_ms: u64,
    pub recent_reconnects: usize,
    pub given_up: bool,
    pub total_failures: u64,
    pub applied_offset: u64,
    /// Offset from the master's last heartbeat on the current link
    pub master_offset: Option<u64>,
    /// Operations the master is ahead of us, when known
    pub lag: Option<u64>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_resume_at: Option<DateTime<Utc>>,
}

/// Replication error types
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store rejected operation at offset {offset}: {reason}")]
    Store { offset: u64, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl From<bincode::error::EncodeError> for ReplicationError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ReplicationError::SerializationError(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for ReplicationError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ReplicationError::SerializationError(e.to_string())
    }
}

pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

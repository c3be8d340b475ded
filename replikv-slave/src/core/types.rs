use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Stored value in the KV store with metadata
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// Raw byte data
    pub data: Vec<u8>,
    /// Optional expiration time
    pub ttl: Option<Instant>,
    /// When the value was created
    pub created_at: Instant,
}

impl StoredValue {
    /// Create a new stored value
    pub fn new(data: Vec<u8>, ttl_secs: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            data,
            ttl: ttl_secs.map(|secs| now + std::time::Duration::from_secs(secs)),
            created_at: now,
        }
    }

    /// Check if the value has expired
    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|expires| Instant::now() >= expires)
    }
}

/// Configuration for KV store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KVConfig {
    /// Maximum memory in MB
    pub max_memory_mb: usize,
    /// TTL cleanup interval in milliseconds
    pub ttl_cleanup_interval_ms: u64,
}

impl Default for KVConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 4096,
            ttl_cleanup_interval_ms: 100,
        }
    }
}

/// Statistics for KV store
#[derive(Debug, Default, Clone, Serialize)]
pub struct KVStats {
    /// Total number of keys
    pub total_keys: usize,
    /// Estimated memory usage in bytes
    pub total_memory_bytes: usize,
    /// Operations applied from the master
    pub replicated: u64,
    /// Number of GET operations
    pub gets: u64,
    /// Number of SET operations
    pub sets: u64,
    /// Number of DELETE operations
    pub dels: u64,
}

/// Write operation carried by the replication stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<u64>,
    },
    Delete {
        keys: Vec<String>,
    },
    FlushAll,
}

/// Query issued by a client against the local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Get {
        key: String,
    },
    Exists {
        key: String,
    },
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<u64>,
    },
    Delete {
        key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Write,
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Get { .. } | Query::Exists { .. } => QueryKind::Read,
            Query::Set { .. } | Query::Delete { .. } => QueryKind::Write,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Query::Get { key }
            | Query::Exists { key }
            | Query::Set { key, .. }
            | Query::Delete { key } => key,
        }
    }
}

/// Answer to a [`Query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    Value(Option<Vec<u8>>),
    Exists(bool),
    Stored,
    Deleted(bool),
}

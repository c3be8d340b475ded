pub mod config;
pub mod core;
pub mod replication;
pub mod server;

// Re-export commonly used types
pub use config::{ConfigError, SlaveConfig};
pub use core::{KVConfig, KVStore, Query, QueryError, QueryResponse, ReplicaStore};
pub use replication::{
    FailoverConfig, FailoverController, FailoverStatus, LinkState, MasterTarget,
    ReplicationConfig, ServingMode, SlaveNode, TcpMasterConnector,
};
pub use server::{AppState, create_router};

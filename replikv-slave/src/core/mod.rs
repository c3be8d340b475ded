pub mod error;
pub mod kv_store;
pub mod store;
pub mod types;

pub use error::{QueryError, StoreError};
pub use kv_store::KVStore;
pub use store::ReplicaStore;
pub use types::{KVConfig, KVStats, Operation, Query, QueryKind, QueryResponse, StoredValue};

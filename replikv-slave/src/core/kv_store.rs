use super::error::{QueryError, StoreError, StoreResult};
use super::store::ReplicaStore;
use super::types::{KVConfig, KVStats, Operation, Query, QueryResponse, StoredValue};
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key-Value store using radix trie for memory-efficient storage
#[derive(Clone)]
pub struct KVStore {
    data: Arc<RwLock<Trie<String, StoredValue>>>,
    stats: Arc<RwLock<KVStats>>,
    config: KVConfig,
}

impl KVStore {
    /// Create a new KV store with the given configuration
    pub fn new(config: KVConfig) -> Self {
        info!(
            "Initializing KV store with max_memory={}MB",
            config.max_memory_mb
        );

        Self {
            data: Arc::new(RwLock::new(Trie::new())),
            stats: Arc::new(RwLock::new(KVStats::default())),
            config,
        }
    }

    /// Start background TTL cleanup task
    pub fn start_ttl_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let interval_ms = self.config.ttl_cleanup_interval_ms.max(1);
        info!("Starting TTL cleanup task (interval={}ms)", interval_ms);

        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

            loop {
                interval.tick().await;
                store.cleanup_expired();
            }
        })
    }

    /// Set a key-value pair
    pub fn set(&self, key: &str, value: Vec<u8>, ttl_secs: Option<u64>) -> StoreResult<()> {
        debug!("SET key={}, size={}, ttl={:?}", key, value.len(), ttl_secs);

        let stored = StoredValue::new(value, ttl_secs);
        let entry_size = Self::estimate_entry_size(key, &stored);

        // Lock order: data, then stats. Both are held from the limit check to the insert.
        let mut data = self.data.write();
        let mut stats = self.stats.write();

        // An overwrite frees the old entry
        let old_size = data
            .get(key)
            .map_or(0, |old| Self::estimate_entry_size(key, old));
        let used = stats.total_memory_bytes.saturating_sub(old_size);
        let max_bytes = self.config.max_memory_mb * 1024 * 1024;
        if used + entry_size > max_bytes {
            warn!("Memory limit exceeded: {}/{}", stats.total_memory_bytes, max_bytes);
            return Err(StoreError::MemoryLimitExceeded);
        }

        if data.insert(key.to_string(), stored).is_none() {
            stats.total_keys += 1;
        }
        stats.sets += 1;
        stats.total_memory_bytes = used + entry_size;

        Ok(())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        debug!("GET key={}", key);

        let data = self.data.read();
        self.stats.write().gets += 1;

        data.get(key)
            .filter(|value| !value.is_expired())
            .map(|value| value.data.clone())
    }

    /// Delete a key
    pub fn delete(&self, key: &str) -> bool {
        debug!("DELETE key={}", key);

        let mut data = self.data.write();
        match data.remove(key) {
            Some(old) => {
                let mut stats = self.stats.write();
                stats.dels += 1;
                stats.total_keys = stats.total_keys.saturating_sub(1);
                stats.total_memory_bytes = stats
                    .total_memory_bytes
                    .saturating_sub(Self::estimate_entry_size(key, &old));
                true
            }
            None => false,
        }
    }

    /// Check if a key exists
    pub fn exists(&self, key: &str) -> bool {
        let data = self.data.read();
        data.get(key).is_some_and(|value| !value.is_expired())
    }

    /// Remove every key
    pub fn flush_all(&self) -> usize {
        let mut data = self.data.write();
        let removed = data.len();
        *data = Trie::new();

        let mut stats = self.stats.write();
        stats.total_keys = 0;
        stats.total_memory_bytes = 0;
        removed
    }

    /// Get statistics
    pub fn stats(&self) -> KVStats {
        self.stats.read().clone()
    }

    /// Clean up expired keys
    fn cleanup_expired(&self) {
        let mut data = self.data.write();
        let mut stats = self.stats.write();

        let expired: Vec<(String, usize)> = data
            .iter()
            .filter(|(_, v)| v.is_expired())
            .map(|(k, v)| (k.clone(), Self::estimate_entry_size(k, v)))
            .collect();

        if !expired.is_empty() {
            debug!("Cleaning up {} expired keys", expired.len());
            for (key, size) in &expired {
                data.remove(key);
                stats.total_memory_bytes = stats.total_memory_bytes.saturating_sub(*size);
            }
            stats.total_keys = stats.total_keys.saturating_sub(expired.len());
        }
    }

    /// Estimate memory size of an entry
    fn estimate_entry_size(key: &str, value: &StoredValue) -> usize {
        key.len() + value.data.len() + std::mem::size_of::<StoredValue>()
    }
}

impl ReplicaStore for KVStore {
    fn apply(&self, operation: &Operation) -> StoreResult<()> {
        match operation {
            Operation::Set { key, value, ttl } => self.set(key, value.clone(), *ttl)?,
            Operation::Delete { keys } => {
                for key in keys {
                    self.delete(key);
                }
            }
            Operation::FlushAll => {
                let removed = self.flush_all();
                debug!("FLUSHALL removed {} keys", removed);
            }
        }

        self.stats.write().replicated += 1;
        Ok(())
    }

    fn serve_query(&self, query: &Query) -> Result<QueryResponse, QueryError> {
        match query {
            Query::Get { key } => Ok(QueryResponse::Value(self.get(key))),
            Query::Exists { key } => Ok(QueryResponse::Exists(self.exists(key))),
            Query::Set { key, value, ttl } => {
                self.set(key, value.clone(), *ttl)?;
                Ok(QueryResponse::Stored)
            }
            Query::Delete { key } => Ok(QueryResponse::Deleted(self.delete(key))),
        }
    }
}

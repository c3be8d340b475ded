use super::error::{QueryError, StoreResult};
use super::types::{Operation, Query, QueryResponse};

/// Store engine driven by the replication slave
///
/// `apply` receives the master's write stream; `serve_query` answers local
/// clients once the failover controller has allowed the query. The engine is
/// responsible for its own internal consistency under concurrent access.
pub trait ReplicaStore: Send + Sync {
    fn apply(&self, operation: &Operation) -> StoreResult<()>;

    fn serve_query(&self, query: &Query) -> Result<QueryResponse, QueryError>;
}

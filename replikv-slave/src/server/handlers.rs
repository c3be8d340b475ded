use crate::core::{KVStats, KVStore, Query, QueryError, QueryResponse};
use crate::replication::control::ControlInfo;
use crate::replication::{FailoverStatus, SlaveNode};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub slave: Arc<SlaveNode>,
    pub kv_store: Arc<KVStore>,
}

// Request/Response types for REST API
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: serde_json::Value,
    pub ttl: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SetResponse {
    pub success: bool,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.slave.status();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "replikv-slave",
        "version": env!("CARGO_PKG_VERSION"),
        "serving_mode": status.serving_mode,
        "replication_running": state.slave.is_running(),
    }))
}

/// Failover state of the replication link
pub async fn replication_status(State(state): State<AppState>) -> Json<FailoverStatus> {
    Json(state.slave.status())
}

/// Operator controls this node understands
pub async fn admin_controls(State(state): State<AppState>) -> Json<Vec<ControlInfo>> {
    Json(state.slave.registry().controls().to_vec())
}

/// Run an operator control
pub async fn admin_control(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> impl IntoResponse {
    info!("Admin control: {} {:?}", req.command, req.args);

    match state.slave.control(&req.command, &req.args) {
        Ok(message) => (
            StatusCode::OK,
            Json(ControlResponse {
                success: true,
                message,
            }),
        ),
        Err(e) => {
            warn!("Admin control {} rejected: {}", req.command, e);
            (
                StatusCode::BAD_REQUEST,
                Json(ControlResponse {
                    success: false,
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// SET endpoint - only accepted while failed over with local serving enabled
pub async fn kv_set(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>, QueryError> {
    debug!("REST SET key={}", req.key);

    // Strings are stored as-is, anything else as its JSON encoding
    let value = match req.value {
        serde_json::Value::String(s) => s.into_bytes(),
        other => serde_json::to_vec(&other)
            .map_err(|e| QueryError::InvalidRequest(e.to_string()))?,
    };

    state.slave.serve_query(Query::Set {
        key: req.key.clone(),
        value,
        ttl: req.ttl,
    })?;

    Ok(Json(SetResponse {
        success: true,
        key: req.key,
    }))
}

/// GET endpoint - retrieve a value by key
pub async fn kv_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>, QueryError> {
    debug!("REST GET key={}", key);

    match state.slave.serve_query(Query::Get { key: key.clone() })? {
        QueryResponse::Value(Some(bytes)) => {
            let value = String::from_utf8(bytes)
                .unwrap_or_else(|e| format!("<binary data: {} bytes>", e.as_bytes().len()));
            Ok(Json(GetResponse { key, value }))
        }
        QueryResponse::Value(None) => Err(QueryError::KeyNotFound(key)),
        other => Err(QueryError::InvalidRequest(format!(
            "unexpected response {:?}",
            other
        ))),
    }
}

/// DELETE endpoint - delete a key
pub async fn kv_delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, QueryError> {
    debug!("REST DELETE key={}", key);

    match state.slave.serve_query(Query::Delete { key: key.clone() })? {
        QueryResponse::Deleted(deleted) => Ok(Json(DeleteResponse { deleted, key })),
        other => Err(QueryError::InvalidRequest(format!(
            "unexpected response {:?}",
            other
        ))),
    }
}

/// STATS endpoint - local store statistics
pub async fn kv_stats(State(state): State<AppState>) -> Json<KVStats> {
    Json(state.kv_store.stats())
}

use super::handlers::{self, AppState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Replication and operator controls
        .route("/replication/status", get(handlers::replication_status))
        .route("/admin/controls", get(handlers::admin_controls))
        .route("/admin/control", post(handlers::admin_control))
        // KV REST API endpoints
        .route("/kv/set", post(handlers::kv_set))
        .route("/kv/stats", get(handlers::kv_stats))
        .route(
            "/kv/{key}",
            get(handlers::kv_get).delete(handlers::kv_delete),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Liveness probe with the service version and the storage backend in use.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let storage = if state.config.database_url.is_some() {
        "postgres"
    } else {
        "memory"
    };

    Json(json!({
        "status": "ok",
        "service": "prep-api",
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage
    }))
}

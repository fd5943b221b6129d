//! Axum route handlers for the Usage API.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::usage::models::UsageStats;

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

/// GET /api/usage/stats
///
/// Today's counters, the plan limits, and the most recent metered calls.
pub async fn handle_usage_stats(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<UsageStats>, AppError> {
    let stats = state.gate.stats(params.user_id).await?;
    Ok(Json(stats))
}

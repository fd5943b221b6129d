//! Axum route handlers for the Preparation API.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::preparation::models::{PreparationState, PreparationStatus};
use crate::state::AppState;
use crate::usage::handlers::UserIdQuery;

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    pub user_id: Uuid,
}

/// POST /api/applications/:id/prepare
///
/// Runs analysis, CV tailoring, and the cover letter for one application. A run that
/// ends `failed` is reported as GENERATION_FAILED; whatever it persisted stays
/// readable through the GET endpoint.
pub async fn handle_prepare(
    State(state): State<AppState>,
    Path(application_id): Path<Uuid>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<PreparationState>, AppError> {
    let preparation = state
        .orchestrator
        .prepare(request.user_id, application_id)
        .await?;

    if preparation.status == PreparationStatus::Failed {
        let reason = preparation
            .metadata
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Preparation failed")
            .to_string();
        return Err(AppError::GenerationFailed(reason));
    }

    Ok(Json(preparation))
}

/// GET /api/applications/:id/preparation
pub async fn handle_get_preparation(
    State(state): State<AppState>,
    Path(application_id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<PreparationState>, AppError> {
    let preparation = state
        .orchestrator
        .current_state(params.user_id, application_id)
        .await?;
    Ok(Json(preparation))
}

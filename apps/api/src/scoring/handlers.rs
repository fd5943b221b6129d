//! Axum route handlers for the Scoring API.

use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::scoring::ats::{score_resume, AtsScoreRequest, AtsScoreResponse};
use crate::state::AppState;

/// POST /api/ats/score
///
/// Scores a CV against a job description. Always answers with a score when quota
/// allows; `method` says whether it came from the AI or the keyword fallback.
pub async fn handle_ats_score(
    State(state): State<AppState>,
    Json(request): Json<AtsScoreRequest>,
) -> Result<Json<AtsScoreResponse>, AppError> {
    let response = score_resume(
        &state.gate,
        state.generator.as_ref(),
        state.config.generation_timeout,
        &request,
    )
    .await?;

    Ok(Json(response))
}

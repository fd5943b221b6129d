//! ATS scoring: one metered call: reserve quota, ask the generation service for a
//! match score, normalize (falling back to keyword overlap), settle the reservation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{generate_within, GenerationService};
use crate::scoring::normalizer::{match_schema, normalize, MatchResult, ScoringInput, ScoringMethod};
use crate::scoring::prompts::build_ats_prompt;
use crate::usage::gate::UsageGate;

/// Endpoint name recorded against the user's quota.
pub const ATS_ENDPOINT: &str = "ats_score";

/// Upper bound on CV / job description size accepted for scoring.
const MAX_INPUT_CHARS: usize = 50_000;

#[derive(Debug, Clone, Deserialize)]
pub struct AtsScoreRequest {
    pub user_id: Uuid,
    pub resume_text: String,
    pub job_description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AtsScoreResponse {
    #[serde(flatten)]
    pub result: MatchResult,
    pub recommendations: Vec<String>,
}

fn validate(request: &AtsScoreRequest) -> Result<(), AppError> {
    if request.resume_text.trim().is_empty() {
        return Err(AppError::Validation("resume_text cannot be empty".to_string()));
    }
    if request.job_description.trim().is_empty() {
        return Err(AppError::Validation(
            "job_description cannot be empty".to_string(),
        ));
    }
    if request.resume_text.chars().count() > MAX_INPUT_CHARS
        || request.job_description.chars().count() > MAX_INPUT_CHARS
    {
        return Err(AppError::Validation(format!(
            "resume_text and job_description must each be under {MAX_INPUT_CHARS} characters"
        )));
    }
    Ok(())
}

/// Scores a CV against a job description for one user.
///
/// Validation and quota failures are returned as errors. Upstream failures are not:
/// they downgrade the result to `method = basic`.
pub async fn score_resume(
    gate: &UsageGate,
    generator: &dyn GenerationService,
    timeout: Duration,
    request: &AtsScoreRequest,
) -> Result<AtsScoreResponse, AppError> {
    validate(request)?;

    let reservation = gate
        .check_and_reserve(request.user_id, ATS_ENDPOINT)
        .await?
        .into_result()?;

    let prompt = build_ats_prompt(&request.resume_text, &request.job_description);
    let (raw, tokens_used) = match generate_within(generator, &prompt, &match_schema(), timeout).await {
        Ok(generation) => (Some(generation.content), generation.tokens_used),
        Err(e) => {
            warn!(
                "ATS scoring falling back to keyword overlap for user {}: {e}",
                request.user_id
            );
            (None, 0)
        }
    };

    let result = normalize(
        raw.as_ref(),
        &ScoringInput {
            candidate_text: &request.resume_text,
            requirements_text: &request.job_description,
        },
    );
    if raw.is_some() && result.method == ScoringMethod::Basic {
        warn!("ATS scoring response was malformed; used keyword overlap instead");
    }

    gate.record_usage_logged(reservation, tokens_used, result.method == ScoringMethod::Ai)
        .await;

    info!(
        "ATS score {}/100 ({}) for user {}",
        result.score,
        result.method.as_str(),
        request.user_id
    );

    let recommendations = build_recommendations(&result);
    Ok(AtsScoreResponse {
        result,
        recommendations,
    })
}

/// Short, human-readable next steps from the score band and top missing factors.
fn build_recommendations(result: &MatchResult) -> Vec<String> {
    let top_gaps: Vec<&str> = result
        .missing_factors
        .iter()
        .take(3)
        .map(String::as_str)
        .collect();

    let mut recommendations = Vec::new();
    if result.score >= 80 {
        recommendations
            .push("Strong fit. Your CV directly covers the key requirements.".to_string());
    } else if result.score >= 60 {
        recommendations.push(format!(
            "Moderate fit ({}/100). Tailor your CV to the role before applying.",
            result.score
        ));
    } else {
        recommendations.push(format!(
            "Low fit ({}/100). Consider whether this role matches your experience.",
            result.score
        ));
    }

    if !top_gaps.is_empty() {
        recommendations.push(format!(
            "Address these gaps if you have the experience: {}.",
            top_gaps.join(", ")
        ));
    }
    if result.method == ScoringMethod::Basic {
        recommendations.push(
            "This score is a keyword estimate. Try again later for a full AI analysis."
                .to_string(),
        );
    }
    recommendations
}

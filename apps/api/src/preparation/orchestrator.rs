//! Application preparation: one metered request that runs the whole pipeline.
//!
//! Flow: ownership check → reserve `prepare_application` → pending|ready|failed → preparing
//!       → analysis → tailored CV → cover letter → ready | failed → settle reservation.
//!
//! Every step persists as soon as it finishes, so a failure later in the run keeps the
//! steps already written. The run itself is detached from the request: a dropped
//! connection does not stop it, and a run that errors out is left `failed`. Each step falls back to a deterministic
//! result when the generation service fails, times out, or answers with garbage.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{generate_within, strip_json_fences, GenerationService};
use crate::models::application::ApplicationRow;
use crate::preparation::fallback;
use crate::preparation::models::{PreparationState, PreparationStatus, PreparationStep};
use crate::preparation::prompts::{
    build_cover_letter_prompt, build_tailor_cv_prompt, cover_letter_schema, tailored_cv_schema,
    TailorPromptInput,
};
use crate::preparation::store::ApplicationStore;
use crate::scoring::normalizer::{match_schema, normalize, MatchResult, ScoringInput, ScoringMethod};
use crate::scoring::prompts::build_ats_prompt;
use crate::usage::gate::UsageGate;
use crate::usage::models::Reservation;

/// Endpoint name recorded against the user's quota.
pub const PREPARE_ENDPOINT: &str = "prepare_application";

/// A `preparing` run with no progress for this long is treated as abandoned.
const STALE_AFTER_MINUTES: i64 = 15;

/// Output of one step, tagged by where it came from.
#[derive(Debug)]
enum Generated<T> {
    Ai { value: T, tokens_used: u64 },
    Basic { value: T, tokens_used: u64 },
}

impl<T> Generated<T> {
    fn method(&self) -> ScoringMethod {
        match self {
            Generated::Ai { .. } => ScoringMethod::Ai,
            Generated::Basic { .. } => ScoringMethod::Basic,
        }
    }

    fn tokens_used(&self) -> u64 {
        match self {
            Generated::Ai { tokens_used, .. } | Generated::Basic { tokens_used, .. } => {
                *tokens_used
            }
        }
    }

    fn value(&self) -> &T {
        match self {
            Generated::Ai { value, .. } | Generated::Basic { value, .. } => value,
        }
    }

    fn into_value(self) -> T {
        match self {
            Generated::Ai { value, .. } | Generated::Basic { value, .. } => value,
        }
    }
}

#[derive(Debug, Default)]
struct RunTally {
    tokens_used: u64,
    ai_steps: u32,
    basic_steps: u32,
}

impl RunTally {
    fn overall_method(&self) -> ScoringMethod {
        if self.basic_steps == 0 && self.ai_steps > 0 {
            ScoringMethod::Ai
        } else {
            ScoringMethod::Basic
        }
    }
}

#[derive(Clone)]
pub struct PreparationOrchestrator {
    gate: Arc<UsageGate>,
    store: Arc<dyn ApplicationStore>,
    generator: Arc<dyn GenerationService>,
    timeout: Duration,
}

impl PreparationOrchestrator {
    pub fn new(
        gate: Arc<UsageGate>,
        store: Arc<dyn ApplicationStore>,
        generator: Arc<dyn GenerationService>,
        timeout: Duration,
    ) -> Self {
        Self {
            gate,
            store,
            generator,
            timeout,
        }
    }

    /// Returns the stored preparation, or a fresh `pending` one.
    pub async fn current_state(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<PreparationState, AppError> {
        self.owned_application(user_id, application_id).await?;
        self.store.ensure_preparation(application_id).await
    }

    /// Runs the full preparation pipeline for one application.
    ///
    /// Returns the final state, `ready` or `failed`. Quota denials, missing or foreign
    /// applications, and runs already in progress are errors and leave the state untouched.
    pub async fn prepare(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<PreparationState, AppError> {
        let application = self.owned_application(user_id, application_id).await?;
        let mut state = self.store.ensure_preparation(application_id).await?;

        if state.status == PreparationStatus::Preparing {
            if !is_stale(&state) {
                return Err(AppError::Conflict(format!(
                    "Application {application_id} is already being prepared"
                )));
            }
            warn!(
                "Recovering abandoned preparation for application {application_id} (last update {})",
                state.updated_at
            );
            state.transition(PreparationStatus::Failed).map_err(internal)?;
            state.metadata.insert(
                "error".to_string(),
                Value::from("Previous preparation run was abandoned"),
            );
            self.store.save_preparation(&state).await?;
        }

        let from = state.status;
        state.transition(PreparationStatus::Preparing).map_err(internal)?;

        let reservation = self
            .gate
            .check_and_reserve(user_id, PREPARE_ENDPOINT)
            .await?
            .into_result()?;

        // Detached: a dropped caller must not strand the reservation or the `preparing` state.
        let run = self.clone();
        tokio::spawn(async move { run.execute(application, state, from, reservation).await })
            .await
            .map_err(internal)?
    }

    async fn execute(
        self,
        application: ApplicationRow,
        mut state: PreparationState,
        from: PreparationStatus,
        reservation: Reservation,
    ) -> Result<PreparationState, AppError> {
        let application_id = application.id;
        let user_id = reservation.user_id;

        let claimed = match self
            .store
            .transition_preparation(application_id, from, PreparationStatus::Preparing)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.gate.record_usage_logged(reservation, 0, false).await;
                return Err(e);
            }
        };
        if !claimed {
            self.gate.record_usage_logged(reservation, 0, false).await;
            return Err(AppError::Conflict(format!(
                "Application {application_id} is already being prepared"
            )));
        }

        info!("Preparing application {application_id} for user {user_id}");
        state.metadata.remove("error");
        state.metadata.remove("failed_step");
        state.metadata.remove("completed_at");
        state
            .metadata
            .insert("started_at".to_string(), Value::from(Utc::now().to_rfc3339()));
        state
            .metadata
            .insert("steps".to_string(), Value::Object(Map::new()));

        let mut tally = RunTally::default();
        let outcome = self.run_steps(&application, &mut state, &mut tally).await;
        if let Err(e) = &outcome {
            self.abandon(&mut state, e).await;
        }

        let success = outcome.is_ok()
            && state.status == PreparationStatus::Ready
            && tally.ai_steps > 0;
        self.gate
            .record_usage_logged(reservation, tally.tokens_used, success)
            .await;
        outcome?;

        info!(
            "Preparation for application {application_id} finished: {} ({}, {} tokens)",
            state.status,
            tally.overall_method().as_str(),
            tally.tokens_used
        );
        Ok(state)
    }

    async fn owned_application(
        &self,
        user_id: Uuid,
        application_id: Uuid,
    ) -> Result<ApplicationRow, AppError> {
        match self.store.fetch_application(application_id).await? {
            Some(application) if application.user_id == user_id => Ok(application),
            _ => Err(AppError::NotFound(format!(
                "Application {application_id} not found"
            ))),
        }
    }

    async fn run_steps(
        &self,
        application: &ApplicationRow,
        state: &mut PreparationState,
        tally: &mut RunTally,
    ) -> Result<(), AppError> {
        let cv_text = match application.cv_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text,
            _ => {
                return self
                    .fail(
                        state,
                        PreparationStep::Analysis,
                        "Upload a CV before preparing this application",
                    )
                    .await;
            }
        };
        if application.job_description.trim().is_empty() {
            return self
                .fail(
                    state,
                    PreparationStep::Analysis,
                    "The application has no job description",
                )
                .await;
        }

        // Step 0: analysis
        let analysis = self.analyze(cv_text, &application.job_description).await;
        record_step(state, tally, PreparationStep::Analysis, &analysis);
        state.metadata.insert(
            PreparationStep::Analysis.key().to_string(),
            serde_json::to_value(analysis.value()).map_err(internal)?,
        );
        self.persist(state).await?;
        let analysis = analysis.into_value();

        // Step 1: tailored CV
        let tailored = self.tailor_cv(application, cv_text, &analysis).await;
        record_step(state, tally, PreparationStep::TailoredCv, &tailored);
        state.tailored_cv = Some(tailored.into_value());
        self.persist(state).await?;

        // Step 2: cover letter
        let tailored_cv = state.tailored_cv.clone().unwrap_or_default();
        let letter = self.cover_letter(application, &analysis, &tailored_cv).await;
        record_step(state, tally, PreparationStep::CoverLetter, &letter);
        state.cover_letter = Some(letter.into_value());

        // Step 3: run metadata
        state.metadata.insert(
            "method".to_string(),
            Value::from(tally.overall_method().as_str()),
        );
        state
            .metadata
            .insert("tokens_used".to_string(), Value::from(tally.tokens_used));
        state
            .metadata
            .insert("completed_at".to_string(), Value::from(Utc::now().to_rfc3339()));
        let mut finished = state.clone();
        finished.transition(PreparationStatus::Ready).map_err(internal)?;
        self.store.save_preparation(&finished).await?;
        *state = finished;
        Ok(())
    }

    async fn analyze(&self, cv_text: &str, job_description: &str) -> Generated<MatchResult> {
        let prompt = build_ats_prompt(cv_text, job_description);
        let (raw, tokens_used) =
            match generate_within(self.generator.as_ref(), &prompt, &match_schema(), self.timeout)
                .await
            {
                Ok(generation) => (Some(generation.content), generation.tokens_used),
                Err(e) => {
                    warn!("Analysis falling back to keyword overlap: {e}");
                    (None, 0)
                }
            };

        let result = normalize(
            raw.as_ref(),
            &ScoringInput {
                candidate_text: cv_text,
                requirements_text: job_description,
            },
        );
        match result.method {
            ScoringMethod::Ai => Generated::Ai {
                value: result,
                tokens_used,
            },
            ScoringMethod::Basic => Generated::Basic {
                value: result,
                tokens_used,
            },
        }
    }

    async fn tailor_cv(
        &self,
        application: &ApplicationRow,
        cv_text: &str,
        analysis: &MatchResult,
    ) -> Generated<String> {
        let matched: Vec<&str> = analysis.matched_factors.iter().map(String::as_str).collect();
        let missing: Vec<&str> = analysis.missing_factors.iter().map(String::as_str).collect();
        let prompt = build_tailor_cv_prompt(&TailorPromptInput {
            job_title: &application.job_title,
            company: &application.company,
            job_description: &application.job_description,
            cv_text,
            matched: &matched,
            missing: &missing,
        });

        let (text, tokens_used) = self
            .generate_text(PreparationStep::TailoredCv, &prompt, &tailored_cv_schema())
            .await;
        match text {
            Some(value) => Generated::Ai { value, tokens_used },
            None => Generated::Basic {
                value: fallback::tailor_cv(cv_text, analysis, application),
                tokens_used,
            },
        }
    }

    async fn cover_letter(
        &self,
        application: &ApplicationRow,
        analysis: &MatchResult,
        tailored_cv: &str,
    ) -> Generated<String> {
        let prompt = build_cover_letter_prompt(
            &application.job_title,
            &application.company,
            &application.job_description,
            tailored_cv,
        );

        let (text, tokens_used) = self
            .generate_text(PreparationStep::CoverLetter, &prompt, &cover_letter_schema())
            .await;
        match text {
            Some(value) => Generated::Ai { value, tokens_used },
            None => Generated::Basic {
                value: fallback::cover_letter(application, analysis, tailored_cv),
                tokens_used,
            },
        }
    }

    /// Asks for a JSON object with one text field named after the step. Tokens are
    /// reported even when the answer turns out to be unusable.
    async fn generate_text(
        &self,
        step: PreparationStep,
        prompt: &str,
        schema: &Value,
    ) -> (Option<String>, u64) {
        match generate_within(self.generator.as_ref(), prompt, schema, self.timeout).await {
            Ok(generation) => {
                let text = extract_text(&generation.content, step.key());
                if text.is_none() {
                    warn!("{} response had no usable text; using fallback", step.key());
                }
                (text, generation.tokens_used)
            }
            Err(e) => {
                warn!("{} generation failed, using fallback: {e}", step.key());
                (None, 0)
            }
        }
    }

    async fn persist(&self, state: &mut PreparationState) -> Result<(), AppError> {
        state.updated_at = Utc::now();
        self.store.save_preparation(state).await
    }

    /// Best-effort `failed` write after a run broke off with an error. Steps already
    /// persisted stay as they are.
    async fn abandon(&self, state: &mut PreparationState, err: &AppError) {
        error!(
            "Preparation for application {} stopped: {err}",
            state.application_id
        );
        if state.status != PreparationStatus::Failed {
            if state.transition(PreparationStatus::Failed).is_err() {
                return;
            }
            state.metadata.insert(
                "error".to_string(),
                Value::from("Preparation stopped by an internal error"),
            );
        }
        state.updated_at = Utc::now();
        if let Err(e) = self.store.save_preparation(state).await {
            error!(
                "Failed to mark preparation for application {} as failed: {e}",
                state.application_id
            );
        }
    }

    /// Ends the run as `failed`. Content from earlier runs is left in place.
    async fn fail(
        &self,
        state: &mut PreparationState,
        step: PreparationStep,
        reason: &str,
    ) -> Result<(), AppError> {
        warn!(
            "Preparation for application {} failed at {}: {reason}",
            state.application_id,
            step.key()
        );
        state
            .metadata
            .insert("error".to_string(), Value::from(reason));
        state
            .metadata
            .insert("failed_step".to_string(), Value::from(step.key()));
        state.transition(PreparationStatus::Failed).map_err(internal)?;
        self.store.save_preparation(state).await
    }
}

fn record_step<T>(
    state: &mut PreparationState,
    tally: &mut RunTally,
    step: PreparationStep,
    output: &Generated<T>,
) {
    let method = output.method();
    tally.tokens_used += output.tokens_used();
    match method {
        ScoringMethod::Ai => tally.ai_steps += 1,
        ScoringMethod::Basic => tally.basic_steps += 1,
    }

    if let Some(Value::Object(steps)) = state.metadata.get_mut("steps") {
        steps.insert(step.key().to_string(), Value::from(method.as_str()));
    }
}

fn extract_text(content: &Value, field: &str) -> Option<String> {
    let parsed;
    let object = match content {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(strip_json_fences(raw)).ok()?;
            &parsed
        }
        other => other,
    };
    object
        .get(field)?
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn is_stale(state: &PreparationState) -> bool {
    Utc::now() - state.updated_at > chrono::Duration::minutes(STALE_AFTER_MINUTES)
}

fn internal<E>(e: E) -> AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    AppError::Internal(e.into())
}

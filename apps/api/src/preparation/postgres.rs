//! PostgreSQL application store. Status changes that race (two prepares at once) go
//! through a conditional `UPDATE … WHERE status = $from`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::application::ApplicationRow;
use crate::preparation::models::{PreparationState, PreparationStatus};
use crate::preparation::store::ApplicationStore;

#[derive(Debug, FromRow)]
struct PreparationRow {
    application_id: Uuid,
    status: String,
    cover_letter: Option<String>,
    tailored_cv: Option<String>,
    metadata: Json<Value>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PreparationRow> for PreparationState {
    type Error = AppError;

    fn try_from(row: PreparationRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<PreparationStatus>().map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Preparation for application {} has invalid status: {e}",
                row.application_id
            ))
        })?;

        let metadata = match row.metadata.0 {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(
                    "Discarding non-object preparation metadata for application {}: {other}",
                    row.application_id
                );
                Map::new()
            }
        };

        Ok(PreparationState {
            application_id: row.application_id,
            status,
            cover_letter: row.cover_letter,
            tailored_cv: row.tailored_cv,
            metadata,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgApplicationStore {
    pool: PgPool,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    async fn fetch_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, AppError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, user_id, job_title, company, job_description, cv_text
            FROM applications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_cv_text(&self, id: Uuid, cv_text: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE applications SET cv_text = $2 WHERE id = $1")
            .bind(id)
            .bind(cv_text)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Application {id} not found")));
        }
        Ok(())
    }

    async fn load_preparation(
        &self,
        application_id: Uuid,
    ) -> Result<Option<PreparationState>, AppError> {
        let row = sqlx::query_as::<_, PreparationRow>(
            r#"
            SELECT application_id, status, cover_letter, tailored_cv, metadata, updated_at
            FROM application_preparations
            WHERE application_id = $1
            "#,
        )
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PreparationState::try_from).transpose()
    }

    async fn ensure_preparation(
        &self,
        application_id: Uuid,
    ) -> Result<PreparationState, AppError> {
        sqlx::query(
            r#"
            INSERT INTO application_preparations (application_id, status, metadata, updated_at)
            VALUES ($1, 'pending', '{}'::jsonb, NOW())
            ON CONFLICT (application_id) DO NOTHING
            "#,
        )
        .bind(application_id)
        .execute(&self.pool)
        .await?;

        self.load_preparation(application_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Application {application_id} not found"))
        })
    }

    async fn transition_preparation(
        &self,
        application_id: Uuid,
        from: PreparationStatus,
        to: PreparationStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE application_preparations
            SET status = $3, updated_at = NOW()
            WHERE application_id = $1 AND status = $2
            "#,
        )
        .bind(application_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_preparation(&self, state: &PreparationState) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO application_preparations
                (application_id, status, cover_letter, tailored_cv, metadata, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (application_id) DO UPDATE
            SET status = EXCLUDED.status,
                cover_letter = EXCLUDED.cover_letter,
                tailored_cv = EXCLUDED.tailored_cv,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.application_id)
        .bind(state.status.as_str())
        .bind(state.cover_letter.as_deref())
        .bind(state.tailored_cv.as_deref())
        .bind(Json(&state.metadata))
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(status: &str, metadata: Value) -> PreparationRow {
        PreparationRow {
            application_id: Uuid::new_v4(),
            status: status.to_string(),
            cover_letter: Some("letter".to_string()),
            tailored_cv: None,
            metadata: Json(metadata),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_converts_to_state() {
        let state =
            PreparationState::try_from(row("ready", json!({"method": "ai"}))).unwrap();
        assert_eq!(state.status, PreparationStatus::Ready);
        assert_eq!(state.metadata["method"], "ai");
        assert_eq!(state.cover_letter.as_deref(), Some("letter"));
    }

    #[test]
    fn test_unknown_status_is_internal_error() {
        let err = PreparationState::try_from(row("done", json!({}))).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_non_object_metadata_becomes_empty() {
        let state = PreparationState::try_from(row("pending", json!([1, 2]))).unwrap();
        assert!(state.metadata.is_empty());
    }
}

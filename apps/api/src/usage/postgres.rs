//! PostgreSQL quota store. Reservation is one conditional `UPDATE … RETURNING`;
//! row locking serializes concurrent reservations for the same `{user_id, date}`
//! and the `WHERE` clause is re-checked against the latest row version.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Plan;
use crate::usage::models::{DenyReason, QuotaPolicy, UsageEvent, UsageRecord};
use crate::usage::store::{QuotaStore, ReserveOutcome};

const RECORD_COLUMNS: &str = "user_id, usage_date, api_calls_today, credits_remaining, \
    credits_granted, total_tokens_used, usage_by_endpoint";

#[derive(Debug, FromRow)]
struct UsageRecordRow {
    user_id: Uuid,
    usage_date: NaiveDate,
    api_calls_today: i32,
    credits_remaining: i32,
    credits_granted: i32,
    total_tokens_used: i64,
    usage_by_endpoint: Json<BTreeMap<String, i64>>,
}

impl From<UsageRecordRow> for UsageRecord {
    fn from(row: UsageRecordRow) -> Self {
        UsageRecord {
            user_id: row.user_id,
            date: row.usage_date,
            api_calls_today: row.api_calls_today.max(0) as u32,
            credits_remaining: row.credits_remaining.max(0) as u32,
            credits_granted: row.credits_granted.max(0) as u32,
            total_tokens_used: row.total_tokens_used.max(0) as u64,
            usage_by_endpoint: row
                .usage_by_endpoint
                .0
                .into_iter()
                .map(|(endpoint, count)| (endpoint, count.max(0) as u32))
                .collect(),
        }
    }
}

#[derive(Debug, FromRow)]
struct UsageEventRow {
    endpoint: String,
    occurred_at: DateTime<Utc>,
    tokens_used: i64,
    success: bool,
    response_time_ms: i64,
}

impl From<UsageEventRow> for UsageEvent {
    fn from(row: UsageEventRow) -> Self {
        UsageEvent {
            endpoint: row.endpoint,
            timestamp: row.occurred_at,
            tokens_used: row.tokens_used.max(0) as u64,
            success: row.success,
            response_time_ms: row.response_time_ms.max(0) as u64,
        }
    }
}

#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        policy: &QuotaPolicy,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO usage_records
                (user_id, usage_date, api_calls_today, credits_remaining, credits_granted,
                 total_tokens_used, usage_by_endpoint)
            VALUES ($1, $2, 0, $3, $3, 0, '{}'::jsonb)
            ON CONFLICT (user_id, usage_date) DO UPDATE
            SET credits_remaining = usage_records.credits_remaining
                    + (EXCLUDED.credits_granted - usage_records.credits_granted),
                credits_granted = EXCLUDED.credits_granted
            WHERE usage_records.credits_granted < EXCLUDED.credits_granted
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(to_i32(policy.daily_credits))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_day(&self, user_id: Uuid, date: NaiveDate) -> Result<UsageRecord, AppError> {
        let row = sqlx::query_as::<_, UsageRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM usage_records WHERE user_id = $1 AND usage_date = $2"
        ))
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No usage record for user {user_id} on {date}")))?;
        Ok(row.into())
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn plan_for(&self, user_id: Uuid) -> Result<Plan, AppError> {
        let tier: Option<String> = sqlx::query_scalar("SELECT tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(Plan::from_tier(tier.as_deref()))
    }

    async fn open_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        policy: &QuotaPolicy,
    ) -> Result<UsageRecord, AppError> {
        self.ensure_day(user_id, date, policy).await?;
        self.fetch_day(user_id, date).await
    }

    async fn try_reserve(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        endpoint: &str,
        policy: &QuotaPolicy,
    ) -> Result<ReserveOutcome, AppError> {
        self.ensure_day(user_id, date, policy).await?;

        let reserved = sqlx::query_as::<_, UsageRecordRow>(&format!(
            r#"
            UPDATE usage_records
            SET api_calls_today = api_calls_today + 1,
                credits_remaining = credits_remaining - 1,
                usage_by_endpoint = usage_by_endpoint || jsonb_build_object(
                    $3::text,
                    COALESCE((usage_by_endpoint ->> $3::text)::bigint, 0) + 1
                )
            WHERE user_id = $1
              AND usage_date = $2
              AND api_calls_today < $4
              AND credits_remaining > 0
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(date)
        .bind(endpoint)
        .bind(to_i32(policy.max_daily_api_calls))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = reserved {
            return Ok(ReserveOutcome::Reserved(row.into()));
        }

        let record = self.fetch_day(user_id, date).await?;
        // The update can only miss because a limit is reached; classify which one.
        let reason = record
            .blocking_reason(policy)
            .unwrap_or(DenyReason::NoCreditsRemaining);
        Ok(ReserveOutcome::Denied(reason, record))
    }

    async fn settle(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        tokens_used: u64,
        refund_credit: bool,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE usage_records
            SET total_tokens_used = total_tokens_used + $3,
                credits_remaining = credits_remaining + CASE WHEN $4 THEN 1 ELSE 0 END
            WHERE user_id = $1 AND usage_date = $2
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(i64::try_from(tokens_used).unwrap_or(i64::MAX))
        .bind(refund_credit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "No usage record for user {user_id} on {date}"
            )));
        }
        Ok(())
    }

    async fn append_event(&self, user_id: Uuid, event: &UsageEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO usage_events
                (user_id, endpoint, occurred_at, tokens_used, success, response_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user_id)
        .bind(&event.endpoint)
        .bind(event.timestamp)
        .bind(i64::try_from(event.tokens_used).unwrap_or(i64::MAX))
        .bind(event.success)
        .bind(i64::try_from(event.response_time_ms).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_events(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let rows = sqlx::query_as::<_, UsageEventRow>(
            r#"
            SELECT endpoint, occurred_at, tokens_used, success, response_time_ms
            FROM usage_events
            WHERE user_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UsageEvent::from).collect())
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

//! Usage gate: decides whether a metered call may proceed and settles it afterwards.
//!
//! Accounting:
//! - `check_and_reserve` counts the attempt toward the daily call ceiling and holds one credit.
//! - `record_usage` adds tokens, logs the event, and refunds the held credit when the call failed.
//!
//! Denied attempts are logged as events and change nothing else.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Plan;
use crate::usage::models::{
    DenyReason, GateDecision, QuotaPolicy, Reservation, UsageEvent, UsageStats,
};
use crate::usage::store::{QuotaStore, ReserveOutcome};

/// Number of events returned with usage stats.
const RECENT_EVENT_LIMIT: usize = 20;

pub struct UsageGate {
    store: Arc<dyn QuotaStore>,
    free: QuotaPolicy,
    premium: QuotaPolicy,
}

impl UsageGate {
    pub fn new(store: Arc<dyn QuotaStore>, free: QuotaPolicy, premium: QuotaPolicy) -> Self {
        Self {
            store,
            free,
            premium,
        }
    }

    pub fn policy_for(&self, plan: Plan) -> QuotaPolicy {
        match plan {
            Plan::Free => self.free,
            Plan::Premium => self.premium,
        }
    }

    /// Reserves one metered call for today (UTC).
    pub async fn check_and_reserve(
        &self,
        user_id: Uuid,
        endpoint: &str,
    ) -> Result<GateDecision, AppError> {
        self.check_and_reserve_on(user_id, endpoint, today()).await
    }

    pub(crate) async fn check_and_reserve_on(
        &self,
        user_id: Uuid,
        endpoint: &str,
        date: NaiveDate,
    ) -> Result<GateDecision, AppError> {
        let plan = self.store.plan_for(user_id).await?;
        let policy = self.policy_for(plan);

        match self.store.try_reserve(user_id, date, endpoint, &policy).await? {
            ReserveOutcome::Reserved(record) => {
                info!(
                    "Reserved {endpoint} for user {user_id}: {}/{} calls, {} credits left",
                    record.api_calls_today, policy.max_daily_api_calls, record.credits_remaining
                );
                Ok(GateDecision::Allowed(Reservation {
                    user_id,
                    date,
                    endpoint: endpoint.to_string(),
                    reserved_at: tokio::time::Instant::now(),
                }))
            }
            ReserveOutcome::Denied(reason, record) => {
                info!(
                    "Denied {endpoint} for user {user_id}: {}",
                    reason.code()
                );
                self.store
                    .append_event(
                        user_id,
                        &UsageEvent {
                            endpoint: endpoint.to_string(),
                            timestamp: Utc::now(),
                            tokens_used: 0,
                            success: false,
                            response_time_ms: 0,
                        },
                    )
                    .await?;

                let (remaining, limit) = match reason {
                    DenyReason::DailyLimitReached => (
                        policy
                            .max_daily_api_calls
                            .saturating_sub(record.api_calls_today),
                        policy.max_daily_api_calls,
                    ),
                    DenyReason::NoCreditsRemaining => {
                        (record.credits_remaining, policy.daily_credits)
                    }
                };
                Ok(GateDecision::Denied {
                    reason,
                    remaining,
                    limit,
                })
            }
        }
    }

    /// Settles a reservation. Called whether or not the downstream call succeeded.
    pub async fn record_usage(
        &self,
        reservation: Reservation,
        tokens_used: u64,
        success: bool,
    ) -> Result<(), AppError> {
        let Reservation {
            user_id,
            date,
            endpoint,
            reserved_at,
        } = reservation;
        let response_time_ms = reserved_at.elapsed().as_millis() as u64;

        self.store
            .settle(user_id, date, tokens_used, !success)
            .await?;
        self.store
            .append_event(
                user_id,
                &UsageEvent {
                    endpoint,
                    timestamp: Utc::now(),
                    tokens_used,
                    success,
                    response_time_ms,
                },
            )
            .await
    }

    /// Like `record_usage`, but a bookkeeping failure is logged instead of failing
    /// a request whose result is already produced.
    pub async fn record_usage_logged(&self, reservation: Reservation, tokens_used: u64, success: bool) {
        let user_id = reservation.user_id;
        if let Err(e) = self.record_usage(reservation, tokens_used, success).await {
            error!("Failed to record usage for user {user_id}: {e}");
        }
    }

    pub async fn stats(&self, user_id: Uuid) -> Result<UsageStats, AppError> {
        let plan = self.store.plan_for(user_id).await?;
        let policy = self.policy_for(plan);
        let record = self.store.open_day(user_id, today(), &policy).await?;
        let recent_events = self
            .store
            .recent_events(user_id, RECENT_EVENT_LIMIT)
            .await?;

        Ok(UsageStats {
            user_id,
            date: record.date,
            plan,
            api_calls_today: record.api_calls_today,
            max_daily_api_calls: policy.max_daily_api_calls,
            credits_remaining: record.credits_remaining,
            daily_credits: policy.daily_credits,
            total_tokens_used: record.total_tokens_used,
            usage_by_endpoint: record.usage_by_endpoint,
            recent_events,
        })
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

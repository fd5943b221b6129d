use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Plan;

/// Daily limits for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub max_daily_api_calls: u32,
    pub daily_credits: u32,
}

/// Per-user, per-UTC-day counters. Mutated only through the quota store's
/// reserve and settle operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub api_calls_today: u32,
    pub credits_remaining: u32,
    /// Largest daily allowance granted so far today.
    pub credits_granted: u32,
    pub total_tokens_used: u64,
    pub usage_by_endpoint: BTreeMap<String, u32>,
}

impl UsageRecord {
    /// A fresh record for the first metered call of the day.
    pub fn open(user_id: Uuid, date: NaiveDate, policy: &QuotaPolicy) -> Self {
        Self {
            user_id,
            date,
            api_calls_today: 0,
            credits_remaining: policy.daily_credits,
            credits_granted: policy.daily_credits,
            total_tokens_used: 0,
            usage_by_endpoint: BTreeMap::new(),
        }
    }

    /// Tops the day up when the user's plan now grants more credits than the record was
    /// opened with. A smaller allowance never takes credits away.
    pub fn grant_allowance(&mut self, policy: &QuotaPolicy) {
        if policy.daily_credits > self.credits_granted {
            self.credits_remaining += policy.daily_credits - self.credits_granted;
            self.credits_granted = policy.daily_credits;
        }
    }

    /// Which limit, if any, blocks one more call.
    pub fn blocking_reason(&self, policy: &QuotaPolicy) -> Option<DenyReason> {
        if self.api_calls_today >= policy.max_daily_api_calls {
            Some(DenyReason::DailyLimitReached)
        } else if self.credits_remaining == 0 {
            Some(DenyReason::NoCreditsRemaining)
        } else {
            None
        }
    }
}

/// Append-only log entry, one per metered call attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub tokens_used: u64,
    pub success: bool,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    DailyLimitReached,
    NoCreditsRemaining,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::DailyLimitReached => "DAILY_LIMIT_REACHED",
            DenyReason::NoCreditsRemaining => "NO_CREDITS_REMAINING",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::DailyLimitReached => {
                "Daily API call limit reached. Usage resets at 00:00 UTC."
            }
            DenyReason::NoCreditsRemaining => {
                "No credits remaining for today. Upgrade your plan or try again tomorrow."
            }
        }
    }
}

/// A held unit of quota. Must be handed back to `UsageGate::record_usage`.
#[derive(Debug)]
pub struct Reservation {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub endpoint: String,
    pub(crate) reserved_at: tokio::time::Instant,
}

#[derive(Debug)]
pub enum GateDecision {
    Allowed(Reservation),
    Denied {
        reason: DenyReason,
        remaining: u32,
        limit: u32,
    },
}

impl GateDecision {
    /// Converts a denial into the terminal quota error.
    pub fn into_result(self) -> Result<Reservation, AppError> {
        match self {
            GateDecision::Allowed(reservation) => Ok(reservation),
            GateDecision::Denied {
                reason,
                remaining,
                limit,
            } => Err(AppError::QuotaExceeded {
                reason,
                remaining,
                limit,
            }),
        }
    }
}

/// Snapshot served to the usage dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub plan: Plan,
    pub api_calls_today: u32,
    pub max_daily_api_calls: u32,
    pub credits_remaining: u32,
    pub daily_credits: u32,
    pub total_tokens_used: u64,
    pub usage_by_endpoint: BTreeMap<String, u32>,
    pub recent_events: Vec<UsageEvent>,
}

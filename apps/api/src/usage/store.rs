//! Quota persistence: keyed by `{user_id, date}`.
//!
//! Both backends make `try_reserve` a single atomic step: the limit check and the
//! increment happen together, so concurrent requests can never overdraw a record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Plan;
use crate::usage::models::{DenyReason, QuotaPolicy, UsageEvent, UsageRecord};

/// Result of an atomic reservation attempt. Both arms carry the record as it
/// stands after the attempt.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Reserved(UsageRecord),
    Denied(DenyReason, UsageRecord),
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// The user's subscription plan. Unknown users resolve to `Plan::Free`.
    async fn plan_for(&self, user_id: Uuid) -> Result<Plan, AppError>;

    /// Returns the day's record, opening it with the policy allowance if absent and
    /// topping it up if the policy grants more credits than the record has seen.
    async fn open_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        policy: &QuotaPolicy,
    ) -> Result<UsageRecord, AppError>;

    /// Atomically: one more call, one less credit, one more hit on `endpoint`,
    /// only if neither limit is reached. Applies the same top-up as `open_day` first.
    async fn try_reserve(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        endpoint: &str,
        policy: &QuotaPolicy,
    ) -> Result<ReserveOutcome, AppError>;

    /// Adds tokens to the day's total and optionally hands back the held credit.
    async fn settle(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        tokens_used: u64,
        refund_credit: bool,
    ) -> Result<(), AppError>;

    async fn append_event(&self, user_id: Uuid, event: &UsageEvent) -> Result<(), AppError>;

    /// Newest first.
    async fn recent_events(&self, user_id: Uuid, limit: usize)
        -> Result<Vec<UsageEvent>, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ────────────────────────────────────────────────────────────────────────────

/// Process-local quota store. Every operation runs inside one lock, which is what
/// makes `try_reserve` atomic here. Used by tests and single-node local runs.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    records: Mutex<HashMap<(Uuid, NaiveDate), UsageRecord>>,
    events: Mutex<HashMap<Uuid, Vec<UsageEvent>>>,
    plans: Mutex<HashMap<Uuid, Plan>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn set_plan(&self, user_id: Uuid, plan: Plan) {
        self.plans.lock().insert(user_id, plan);
    }

    #[cfg(test)]
    /// Overwrites a day's record. Lets callers seed a partially used day.
    pub fn put_record(&self, record: UsageRecord) {
        self.records
            .lock()
            .insert((record.user_id, record.date), record);
    }

    #[cfg(test)]
    pub fn record(&self, user_id: Uuid, date: NaiveDate) -> Option<UsageRecord> {
        self.records.lock().get(&(user_id, date)).cloned()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn plan_for(&self, user_id: Uuid) -> Result<Plan, AppError> {
        Ok(self.plans.lock().get(&user_id).copied().unwrap_or_default())
    }

    async fn open_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        policy: &QuotaPolicy,
    ) -> Result<UsageRecord, AppError> {
        let mut records = self.records.lock();
        let record = records
            .entry((user_id, date))
            .or_insert_with(|| UsageRecord::open(user_id, date, policy));
        record.grant_allowance(policy);
        Ok(record.clone())
    }

    async fn try_reserve(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        endpoint: &str,
        policy: &QuotaPolicy,
    ) -> Result<ReserveOutcome, AppError> {
        let mut records = self.records.lock();
        let record = records
            .entry((user_id, date))
            .or_insert_with(|| UsageRecord::open(user_id, date, policy));
        record.grant_allowance(policy);

        if let Some(reason) = record.blocking_reason(policy) {
            return Ok(ReserveOutcome::Denied(reason, record.clone()));
        }

        record.api_calls_today += 1;
        record.credits_remaining -= 1;
        *record
            .usage_by_endpoint
            .entry(endpoint.to_string())
            .or_insert(0) += 1;

        Ok(ReserveOutcome::Reserved(record.clone()))
    }

    async fn settle(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        tokens_used: u64,
        refund_credit: bool,
    ) -> Result<(), AppError> {
        let mut records = self.records.lock();
        let record = records.get_mut(&(user_id, date)).ok_or_else(|| {
            AppError::NotFound(format!("No usage record for user {user_id} on {date}"))
        })?;

        record.total_tokens_used += tokens_used;
        if refund_credit {
            record.credits_remaining += 1;
        }
        Ok(())
    }

    async fn append_event(&self, user_id: Uuid, event: &UsageEvent) -> Result<(), AppError> {
        self.events
            .lock()
            .entry(user_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn recent_events(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let events = self.events.lock();
        Ok(events
            .get(&user_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

//! Shared fixtures for unit and router tests: stub generation services and an
//! `AppState` wired to in-memory stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::llm_client::{Generation, GenerationService, LlmError};
use crate::preparation::orchestrator::PreparationOrchestrator;
use crate::preparation::store::InMemoryApplicationStore;
use crate::state::AppState;
use crate::usage::gate::UsageGate;
use crate::usage::models::QuotaPolicy;
use crate::usage::store::InMemoryQuotaStore;

pub const TOKENS_PER_CALL: u64 = 100;

pub const TEST_FREE_PLAN: QuotaPolicy = QuotaPolicy {
    max_daily_api_calls: 10,
    daily_credits: 3,
};

pub const TEST_PREMIUM_PLAN: QuotaPolicy = QuotaPolicy {
    max_daily_api_calls: 100,
    daily_credits: 50,
};

/// Answers by schema `title`. A title with no scripted answer is an upstream failure.
#[derive(Default)]
pub struct StubGenerator {
    answers: HashMap<String, Value>,
    delay: Option<Duration>,
    stalls_on: Option<String>,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator that never returns a usable answer.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn answer(mut self, schema_title: &str, content: Value) -> Self {
        self.answers.insert(schema_title.to_string(), content);
        self
    }

    /// Every call sleeps this long before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls for this schema title never return.
    pub fn stalling_on(mut self, schema_title: &str) -> Self {
        self.stalls_on = Some(schema_title.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for StubGenerator {
    async fn generate(&self, _prompt: &str, schema: &Value) -> Result<Generation, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let title = schema.get("title").and_then(Value::as_str).unwrap_or_default();
        if self.stalls_on.as_deref() == Some(title) {
            std::future::pending::<()>().await;
        }
        match self.answers.get(title) {
            Some(content) => Ok(Generation {
                content: content.clone(),
                tokens_used: TOKENS_PER_CALL,
            }),
            None => Err(LlmError::Api {
                status: 503,
                message: "stub: service unavailable".to_string(),
            }),
        }
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        openai_api_key: "test-key".to_string(),
        openai_base_url: "http://localhost:1".to_string(),
        port: 0,
        rust_log: "debug".to_string(),
        generation_timeout: Duration::from_secs(8),
        free_plan: TEST_FREE_PLAN,
        premium_plan: TEST_PREMIUM_PLAN,
    }
}

/// Handles onto the in-memory backends behind a test `AppState`.
pub struct TestHarness {
    pub state: AppState,
    pub quotas: Arc<InMemoryQuotaStore>,
    pub applications: Arc<InMemoryApplicationStore>,
    pub generator: Arc<StubGenerator>,
}

pub fn harness(generator: StubGenerator) -> TestHarness {
    let config = test_config();
    let quotas = Arc::new(InMemoryQuotaStore::new());
    let applications = Arc::new(InMemoryApplicationStore::new());
    let generator = Arc::new(generator);

    let gate = Arc::new(UsageGate::new(
        quotas.clone(),
        config.free_plan,
        config.premium_plan,
    ));
    let orchestrator = Arc::new(PreparationOrchestrator::new(
        gate.clone(),
        applications.clone(),
        generator.clone(),
        config.generation_timeout,
    ));

    let state = AppState {
        config,
        gate,
        applications: applications.clone(),
        generator: generator.clone(),
        orchestrator,
    };

    TestHarness {
        state,
        quotas,
        applications,
        generator,
    }
}

use std::sync::Arc;

use crate::config::Config;
use crate::llm_client::GenerationService;
use crate::preparation::orchestrator::PreparationOrchestrator;
use crate::preparation::store::ApplicationStore;
use crate::usage::gate::UsageGate;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Quota reservation and settlement for every metered endpoint.
    pub gate: Arc<UsageGate>,
    pub applications: Arc<dyn ApplicationStore>,
    /// Generation backend. Default: OpenAI-compatible `LlmClient`; tests inject stubs.
    pub generator: Arc<dyn GenerationService>,
    pub orchestrator: Arc<PreparationOrchestrator>,
}

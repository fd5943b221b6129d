mod config;
mod cv;
mod db;
mod errors;
mod llm_client;
mod models;
mod preparation;
mod routes;
mod scoring;
mod state;
mod usage;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::preparation::orchestrator::PreparationOrchestrator;
use crate::preparation::postgres::PgApplicationStore;
use crate::preparation::store::{ApplicationStore, InMemoryApplicationStore};
use crate::routes::build_router;
use crate::state::AppState;
use crate::usage::gate::UsageGate;
use crate::usage::postgres::PgQuotaStore;
use crate::usage::store::{InMemoryQuotaStore, QuotaStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing or malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting prep-api v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage
    let (quotas, applications): (Arc<dyn QuotaStore>, Arc<dyn ApplicationStore>) =
        match &config.database_url {
            Some(url) => {
                let db = create_pool(url).await?;
                (
                    Arc::new(PgQuotaStore::new(db.clone())),
                    Arc::new(PgApplicationStore::new(db)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory stores (data is lost on restart)");
                (
                    Arc::new(InMemoryQuotaStore::new()),
                    Arc::new(InMemoryApplicationStore::new()),
                )
            }
        };

    // Initialize generation client
    let llm = LlmClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    )?;
    info!(
        "LLM client initialized (model: {}, timeout: {:?})",
        llm_client::MODEL,
        config.generation_timeout
    );
    let generator = Arc::new(llm);

    // Usage gate: free / premium policies from config
    let gate = Arc::new(UsageGate::new(
        quotas,
        config.free_plan,
        config.premium_plan,
    ));
    info!(
        "Quota policies: free {:?}, premium {:?}",
        config.free_plan, config.premium_plan
    );

    let orchestrator = Arc::new(PreparationOrchestrator::new(
        gate.clone(),
        applications.clone(),
        generator.clone(),
        config.generation_timeout,
    ));

    // Build app state
    let state = AppState {
        config: config.clone(),
        gate,
        applications,
        generator,
        orchestrator,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

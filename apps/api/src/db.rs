use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Tables the Postgres stores read and write.
const REQUIRED_TABLES: [&str; 5] = [
    "users",
    "usage_records",
    "usage_events",
    "applications",
    "application_preparations",
];

/// Creates a PostgreSQL connection pool and checks the schema is in place.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    verify_schema(&pool).await?;
    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Fails startup with the list of missing tables instead of erroring per request later.
async fn verify_schema(pool: &PgPool) -> Result<()> {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(table)
            .fetch_one(pool)
            .await?;
        if found.is_none() {
            missing.push(table);
        }
    }

    if !missing.is_empty() {
        bail!(
            "Database schema is missing tables: {}. Apply apps/api/migrations first.",
            missing.join(", ")
        );
    }
    Ok(())
}

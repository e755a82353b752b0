use anyhow::{Context, Result};
use ballot_measures::api::{router, AppState};
use ballot_measures::config::Config;
use ballot_measures::{db, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(false);
    info!("🗳️  Starting California Ballot Measures API server...");

    // Load environment variables
    let config = Config::from_env()?;
    config.ensure_dirs()?;

    // Create database connection pool
    info!("📦 Connecting to database...");
    let pool = db::open(&config.database_url).await?;
    info!("✅ Database connected successfully");

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let app = router(AppState::new(pool, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

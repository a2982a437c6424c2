//! Storyteller API server entry point.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use storyteller_api::config::ServerConfig;
use storyteller_api::error::AppError;
use storyteller_api::state::AppState;
use storyteller_core::clock::SystemClock;
use storyteller_core::repository::StoryRepository;
use storyteller_core::token::RandomTokenSource;
use storyteller_store::schema::MIGRATOR;
use storyteller_store::{MemoryStoryRepository, PgStoryRepository};
use tracing_subscriber::EnvFilter;

async fn story_repository(config: &ServerConfig) -> Result<Arc<dyn StoryRepository>, AppError> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL is not set, stories are kept in memory only");
        return Ok(Arc::new(MemoryStoryRepository::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    MIGRATOR.run(&pool).await?;
    tracing::info!("Connected to PostgreSQL, migrations applied");

    Ok(Arc::new(PgStoryRepository::new(pool)))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Storyteller API server");

    let config = ServerConfig::from_env()?;
    let app_state = AppState::new(
        config.story,
        Arc::new(SystemClock),
        Arc::new(RandomTokenSource),
        story_repository(&config).await?,
    );
    let app = storyteller_api::app(app_state);

    let addr = config.listen_addr()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use exam_portal::config::{Config, SWEEP_INTERVAL_SECONDS};
use exam_portal::db;
use exam_portal::exam::countdown::{Clock, SystemClock};
use exam_portal::exam::source::{FixedQuestionSource, SqlQuestionSource};
use exam_portal::routes;
use exam_portal::state::AppState;
use sqlx::SqlitePool;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment (.env included)
    let config = Config::from_env()?;

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let pool = connect_with_retry(&config.database_url).await?;
    tracing::info!("Database connected...");

    tracing::info!("Running migrations...");
    db::migrate(&pool).await?;
    tracing::info!("Migrations applied successfully.");

    let practice_set = FixedQuestionSource::builtin()?;

    // Seed the question bank on first start
    match SqlQuestionSource::new(pool.clone())
        .seed_if_empty(practice_set.questions())
        .await
    {
        Ok(0) => {}
        Ok(n) => tracing::info!("Seeded question bank with {} questions.", n),
        Err(e) => tracing::error!("Failed to seed question bank: {}", e),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::new(pool, config.clone(), practice_set, clock);

    // Sessions left running by a previous process resume their countdowns.
    if let Err(e) = state.exams.rearm_all().await {
        tracing::error!("Failed to re-arm running sessions: {}", e);
    }
    tokio::spawn(
        state
            .exams
            .clone()
            .run_sweeper(Duration::from_secs(SWEEP_INTERVAL_SECONDS)),
    );

    let app = routes::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    axum::serve(listener, app).await?;
    Ok(())
}

async fn connect_with_retry(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let mut retry_count = 0;
    loop {
        match db::connect(database_url).await {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    tracing::error!("Failed to connect to database after 5 retries: {}", e);
                    return Err(e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

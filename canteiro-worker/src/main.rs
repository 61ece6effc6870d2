//! # Canteiro Worker
//!
//! Sweeps expired workflow sessions and raises compliance, stock and vacation alerts.
//! Migrations are owned by the API server; start it first on a fresh database.
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/canteiro cargo run -p canteiro-worker
//! ```

use canteiro_shared::db::pool::{close_pool, create_pool, DatabaseConfig};
use canteiro_worker::{config::WorkerConfig, jobs::default_jobs, scheduler::Scheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canteiro_worker=debug,canteiro_shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Canteiro Worker v{} starting", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(DatabaseConfig {
        url: config.database_url.clone(),
        max_connections: config.max_connections,
        ..DatabaseConfig::default()
    })
    .await?;

    let scheduler = Scheduler::new(pool.clone(), config.poll_interval(), default_jobs(&config));

    let shutdown = scheduler.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    scheduler.run().await;

    close_pool(pool).await;
    tracing::info!("Worker stopped");

    Ok(())
}

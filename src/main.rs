use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use guildcast::aggregator::create_aggregator;
use guildcast::config::Settings;
use guildcast::server::{create_app, AppState};
use guildcast::tasks::BroadcastTask;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Connect Postgres if configured; otherwise the service runs with the
    // memory aggregator and serves empty snapshots.
    let pool = match settings.database.url {
        Some(ref url) => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .acquire_timeout(Duration::from_secs(settings.database.connect_timeout_seconds))
                .connect(url)
                .await?;
            tracing::info!(
                max_connections = settings.database.max_connections,
                "PostgreSQL connection pool created"
            );
            Some(pool)
        }
        None => None,
    };

    let aggregator = create_aggregator(&settings.database, pool);

    // Create application state
    let state = AppState::new(settings.clone(), aggregator);
    tracing::info!("Application state initialized");

    // Shutdown signal fan-out for background tasks
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    // Start the periodic broadcast scheduler in background
    let broadcast_task = BroadcastTask::new(
        settings.realtime.clone(),
        state.broadcaster.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let broadcast_handle = tokio::spawn(async move {
        broadcast_task.run().await;
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = broadcast_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the broadcast scheduler
    let _ = shutdown_tx.send(());
}

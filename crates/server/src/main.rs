//! Admin hub server
//!
//! Serves the admin console's real-time channel: authenticated WebSocket connections grouped by
//! room, plus REST endpoints that push chat, notification and task-progress messages to them.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use adminhub_server::{
    auth::{random_secret, JwtVerifier, MemoryBlacklist},
    config::{PresenceBackend, ServerConfig},
    db::{self, AuroraChatStore},
    frontend,
    hub::ChatHub,
    presence::{
        self, AuroraPresenceRecorder, DisabledPresenceRecorder, MemoryPresenceRecorder,
        PresenceRecorder,
    },
    routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize tracing
    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adminhub_server=debug,tower_http=debug".into()),
        )
        .with(fmt_layer)
        .init();

    // Initialize database
    let db = Arc::new(db::init_database(&config.db_path)?);
    tracing::info!(path = %config.db_path, "Database opened");

    let recorder: Arc<dyn PresenceRecorder> = match config.presence {
        PresenceBackend::Aurora => Arc::new(AuroraPresenceRecorder::new(db.clone())),
        PresenceBackend::Memory => Arc::new(MemoryPresenceRecorder::default()),
        PresenceBackend::Disabled => Arc::new(DisabledPresenceRecorder),
    };
    tracing::info!(backend = ?config.presence, "Presence recorder selected");

    let hub = Arc::new(ChatHub::new(config.hub.clone(), recorder));
    if config.presence != PresenceBackend::Disabled {
        presence::spawn_sweeper(hub.clone(), config.presence_sweep, config.presence_ttl);
    }

    let secret = match &config.jwt_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!("ADMINHUB_JWT_SECRET not set; using a random secret for this run");
            random_secret()
        }
    };
    let verifier = JwtVerifier::new(secret.as_bytes(), Arc::new(MemoryBlacklist::default()));

    let state = AppState::new(
        hub,
        Arc::new(verifier),
        Arc::new(AuroraChatStore::new(db)),
    );
    let app = frontend::mount_admin_console(routes::build_router(state), &config.frontend);

    // Start server
    tracing::info!("Starting server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

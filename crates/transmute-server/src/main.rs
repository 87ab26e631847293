use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transmute_core::AppBuilder;
use transmute_core::impls::FsBlobStore;
use transmute_server::config::ServerConfig;
use transmute_server::router::build_app_router;
use transmute_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "transmute_server=debug,transmute_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Storage ---
    let blobs = FsBlobStore::open(&config.storage_dir)
        .await
        .with_context(|| format!("failed to open storage at {}", config.storage_dir.display()))?;
    tracing::info!(root = %config.storage_dir.display(), "Blob store ready");

    // --- Conversion service ---
    let mut builder = AppBuilder::new(config.service.clone())
        .with_builtin_converters()?
        .blob_store(Arc::new(blobs));
    if let Some(ffmpeg) = &config.ffmpeg_path {
        builder = builder.with_ffmpeg(ffmpeg.clone())?;
    }
    let app = builder.build()?.start();

    // --- Router ---
    let state = AppState {
        intake: app.intake(),
        config: Arc::new(config.clone()),
    };
    let router = build_app_router(state)?;

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("HOST is not an IP address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping workers");
    app.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

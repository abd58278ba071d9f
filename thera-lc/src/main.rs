//! thera-lc - Assignment and Route lifecycle service
//!
//! Serves the lifecycle HTTP API and runs the periodic overdue sweeper
//! against the shared SQLite database.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thera_common::config::{resolve_root_folder, LifecycleConfig};
use thera_common::db::init_database_with_timeout;
use thera_lc::{build_router, AppState};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for thera-lc
#[derive(Parser, Debug)]
#[command(name = "thera-lc")]
#[command(about = "Assignment and Route lifecycle service")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, env = "THERA_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "THERA_LC_PORT")]
    port: Option<u16>,

    /// TOML config file
    #[arg(short, long, env = "THERA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thera_lc=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting thera-lc v{}", env!("CARGO_PKG_VERSION"));

    let config = LifecycleConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let port = args.port.unwrap_or(config.port);

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "THERA_ROOT_FOLDER", Some(&config));
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = LifecycleConfig::database_path(&root_folder);
    let pool = init_database_with_timeout(&db_path, config.busy_timeout_ms)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database ready: {}", db_path.display());

    let state = AppState::new(pool, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.sweep_enabled {
        Some(
            state
                .sweeper
                .clone()
                .spawn(Duration::from_secs(config.sweep_interval_secs), shutdown_rx),
        )
    } else {
        info!("Overdue sweeper disabled by configuration");
        None
    };

    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("thera-lc listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        handle.await.context("Sweeper task panicked")?;
    }

    info!("thera-lc stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

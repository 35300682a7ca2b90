//! Chorale Player - Main entry point
//!
//! Multi-track choir playback service: one audio track per voice part,
//! kept aligned and controlled over HTTP, with engine events on SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chorale_common::config::{database_path, find_config_file, resolve_root_folder, ROOT_FOLDER_ENV};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chorale_player::api::{self, AppContext};
use chorale_player::audio::SystemClock;
use chorale_player::config::{TomlConfig, DEFAULT_PORT};
use chorale_player::playback::{HttpFetcher, TrackLoader};
use chorale_player::SharedState;

/// Command-line arguments for chorale-player
#[derive(Parser, Debug)]
#[command(name = "chorale-player")]
#[command(about = "Multi-track choir playback service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CHORALE_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and relative track paths
    #[arg(short, long)]
    root_folder: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorale_player=debug,chorale_common=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!(
        "Chorale Player {} ({} build {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_PROFILE"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    // Config file: explicit path, else the platform default if one exists
    let config_path = args.config.clone().or_else(|| find_config_file().ok());
    let config = match &config_path {
        Some(path) => TomlConfig::load(path).context("Failed to load configuration")?,
        None => TomlConfig::default(),
    };

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config_path.as_deref(),
    );
    let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);
    let tuning = config.engine.clone();
    info!("Root folder: {}", root_folder.display());
    info!("Engine tuning: {:?}", tuning);

    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    let db_pool = chorale_common::db::init_database(&database_path(&root_folder))
        .await
        .context("Failed to initialize database")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = Arc::new(HttpFetcher::new(http.clone(), root_folder.clone()));
    let loader = Arc::new(TrackLoader::new(fetcher, tuning.max_concurrent_loads));

    let state = Arc::new(SharedState::new());
    let ctx = AppContext {
        state: Arc::clone(&state),
        db_pool,
        http,
        loader,
        clock: Arc::new(SystemClock::new()),
        tuning,
        root_folder,
        port,
    };
    let app = api::create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.close_session().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
                tracing::error!("Failed to install signal handler: {}", e);
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

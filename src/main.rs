mod artifacts;
mod compiler;
mod config;
mod error;
mod heuristic;
mod protocol;
mod runner;
mod server;
mod session;
mod share;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::compiler::Toolchain;
use crate::config::ServerConfig;
use crate::heuristic::InputDetector;
use crate::server::AppState;
use crate::session::{SessionContext, SessionRegistry};
use crate::share::ShareStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("playground=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;

    // Load toolchain configuration
    let toolchain_path = std::env::var("TOOLCHAIN_CONFIG").ok().map(PathBuf::from);
    let toolchain = Toolchain::load(toolchain_path.as_deref())?;
    info!(
        "Loaded toolchain {:?} from {}",
        toolchain.compile_command,
        toolchain_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in defaults".into())
    );

    let artifacts = ArtifactStore::new(
        &config.artifact_dir,
        &toolchain.source_extension,
        &toolchain.binary_extension,
    );
    artifacts
        .ensure_dir()
        .await
        .with_context(|| format!("Failed to create artifact dir {:?}", config.artifact_dir))?;
    info!("Artifacts stored in {:?}", artifacts.dir());
    match artifacts.sweep().await {
        Ok(0) => {}
        Ok(n) => info!("Removed {} stale artifacts", n),
        Err(e) => warn!("Stale artifact sweep failed: {}", e),
    }

    let detector = InputDetector::new(&toolchain.input_patterns)?;
    let ctx = Arc::new(SessionContext {
        artifacts: artifacts.clone(),
        toolchain: Arc::new(toolchain),
        detector,
        probe: config.probe.clone(),
    });
    let registry = SessionRegistry::new(ctx);

    let shares = ShareStore::new(config.share_ttl);
    let _sweeper = shares.spawn_sweeper(config.share_sweep_interval);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Playground listening on {}", config.bind_addr);

    let app = server::router(AppState {
        registry: Arc::clone(&registry),
        shares,
        config: Arc::new(config),
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("HTTP server failed")?;

    match artifacts.sweep().await {
        Ok(n) => info!("Shutdown complete, removed {} leftover artifacts", n),
        Err(e) => warn!("Final artifact sweep failed: {}", e),
    }
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, after every session has been cleaned up
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    registry.shutdown_all().await;
}

//! uxc-analysis - UX critique analysis service
//!
//! Loads configuration, wires the HTTP provider adapters into the pipeline
//! controller and serves the analysis API.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uxc_analysis::config::AnalysisConfig;
use uxc_analysis::providers::{build_providers, build_research, build_retriever};
use uxc_analysis::workflow::PipelineController;
use uxc_analysis::{build_router, AppState};
use uxc_common::events::EventBus;

/// Command-line arguments for uxc-analysis
#[derive(Parser, Debug)]
#[command(name = "uxc-analysis")]
#[command(about = "Multi-model UX critique analysis service")]
#[command(version)]
struct Args {
    /// Configuration file (overrides UXC_CONFIG and the user config file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides [server] host)
    #[arg(long, env = "UXC_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "UXC_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) =
        AnalysisConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting uxc-analysis v{}", env!("CARGO_PKG_VERSION"));
    info!(
        source = %source,
        providers = config.providers.len(),
        preferred = %config.preferred_provider(),
        "Analysis configuration validated"
    );

    let providers = build_providers(&config).context("Failed to configure analysis providers")?;
    let retriever = build_retriever(&config).context("Failed to configure knowledge retrieval")?;
    let research = build_research(&config).context("Failed to configure research client")?;

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let event_bus = EventBus::new(config.server.event_capacity);

    let controller = PipelineController::new(config, providers, retriever, research)
        .context("Failed to initialize pipeline controller")?;
    info!("Pipeline controller initialized ({} providers)", controller.provider_count());

    let app = build_router(AppState::new(controller, event_bus));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("uxc-analysis listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

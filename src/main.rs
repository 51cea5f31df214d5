//! Threatwatch server binary.
//!
//! Reads configuration from `THREATWATCH_*` environment variables, starts the
//! monitoring scheduler and serves the HTTP API until Ctrl-C.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use threatwatch::api::{AppState, router};
use threatwatch::config::OracleConfig;
use threatwatch::oracle::Oracle;
use threatwatch::orchestrator::Orchestrator;
use threatwatch::providers::ProviderCategory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("threatwatch=info".parse()?))
        .init();

    let config = OracleConfig::from_env();
    let port = config.port;

    let enabled: Vec<&str> = config
        .providers
        .iter()
        .filter(|p| !p.api_key.is_empty())
        .map(|p| p.name.as_str())
        .collect();
    info!(
        port,
        simulate = config.simulate,
        cycle_interval_secs = config.cycle_interval.as_secs(),
        providers = ?enabled,
        "Starting Threatwatch"
    );
    if !config.simulate
        && !config
            .providers
            .iter()
            .any(|p| p.category == ProviderCategory::Imagery && !p.api_key.is_empty())
    {
        warn!("No imagery provider credentials configured, imagery pass will be empty");
    }

    let oracle = Oracle::new(config);
    let orchestrator = Orchestrator::new(oracle);
    let tasks = orchestrator.start();

    let app = router(AppState::new(orchestrator.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Threatwatch is listening");

    let scheduler = orchestrator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal, running until killed");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            scheduler.stop();
        })
        .await?;

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Threatwatch stopped");

    Ok(())
}

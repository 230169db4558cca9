//! UIP VES - op-intent compiler and attestation session service
//!
//! Accepts op-intent documents, compiles them into per-chain transaction
//! intents and coordinates the signed attestation exchange for each one.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use uip_ves::api::{self, AppState};
use uip_ves::chain::ChainManager;
use uip_ves::config::Settings;
use uip_ves::intent::{ChainDns, StaticChainDns};
use uip_ves::metrics::MetricsServer;
use uip_ves::session::{RegistryOptions, SessionRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting UIP VES v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Arc::new(Settings::load()?);
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let dns: Arc<dyn ChainDns> = Arc::new(StaticChainDns::from_settings(&settings)?);

    let registry = Arc::new(SessionRegistry::new(
        dns.clone(),
        RegistryOptions::from_config(&settings.ves, &settings.ledger.deploy_gas),
    ));

    // Initialize chain manager (handles all chain connections)
    let chain_manager = Arc::new(ChainManager::new(&settings)?);
    info!("Chain connections initialized");

    let health = chain_manager.health_check().await;
    for (chain, healthy) in health {
        if !healthy {
            warn!("Chain {} is not reachable yet", chain);
        }
    }

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            registry: registry.clone(),
            chain_manager: chain_manager.clone(),
            dns: dns.clone(),
            settings: settings.clone(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("UIP VES is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!(
        "Shutdown signal received, dropping {} live sessions",
        registry.len()
    );

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("UIP VES stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,uip_ves=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}

//! Settlement engine daemon
//!
//! Polls every configured chain, re-checks proofs as heads advance and
//! serves the settlement API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use xchain_settlement::api::{self, AppState};
use xchain_settlement::chain::{ChainManager, ChainOracle};
use xchain_settlement::clock::{Clock, SystemClock};
use xchain_settlement::config::Settings;
use xchain_settlement::coordination::CoordinationEngine;
use xchain_settlement::events::EventBus;
use xchain_settlement::metrics::{self, MetricsServer};
use xchain_settlement::service::SettlementService;
use xchain_settlement::state::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting settlement engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Chain providers (handles all chain connections)
    let chain_manager =
        Arc::new(ChainManager::new(&settings).context("Failed to initialize chain providers")?);
    info!("Chain connections initialized");

    let oracle: Arc<dyn ChainOracle> = chain_manager.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = EventBus::new(settings.engine.event_channel_capacity);
    let registry = Arc::new(Registry::in_memory(events));

    let service = Arc::new(SettlementService::new(
        &settings,
        registry.clone(),
        oracle.clone(),
        clock.clone(),
    ));

    // Coordination engine fed by the chain listeners
    let (engine_tx, engine_rx) = mpsc::channel(1024);
    let coordination_engine = Arc::new(CoordinationEngine::new(
        registry.clone(),
        oracle,
        service.verifier().clone(),
        clock,
        settings.engine.clone(),
        engine_rx,
    ));
    info!("Coordination engine initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            service: service.clone(),
            chain_manager: Some(chain_manager.clone()),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start chain listeners
    let listener_handles = chain_manager.spawn_listeners(engine_tx);

    // Start coordination engine
    let coordination_handle = tokio::spawn({
        let engine = coordination_engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Coordination engine error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let interval = settings.engine.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let health = chain_manager.health_check().await;
                let mut healthy = true;
                for (chain_id, ok) in health {
                    if !ok {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    }
                }
                metrics::record_health_check(healthy);
            }
        }
    });

    info!("Settlement engine is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    coordination_engine.stop().await;
    chain_manager.stop().await;

    // Abort background tasks
    api_handle.abort();
    coordination_handle.abort();
    health_handle.abort();
    for handle in listener_handles {
        handle.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Settlement engine stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xchain_settlement=debug,hyper=warn"));

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
            Ok(mut stream) => {
                stream.recv().await;
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

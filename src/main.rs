//! Tesseract Orchestrator - multi-chain operation coordination service
//!
//! Connects the wallet to every configured chain, serves balances and
//! transfer status over HTTP, and reconciles transfers stuck between lock
//! and mint.

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use tesseract_orchestrator::api::{self, AppState};
use tesseract_orchestrator::arbitrage::{ArbitrageEngine, FixedCostModel, StaticPriceSource};
use tesseract_orchestrator::balance::BalanceAggregator;
use tesseract_orchestrator::chain::HttpConnector;
use tesseract_orchestrator::config::{LogFormat, Settings};
use tesseract_orchestrator::metrics::{self, MetricsServer};
use tesseract_orchestrator::rebalance::RebalancingPlanner;
use tesseract_orchestrator::state::{MemoryStore, PostgresStore, TransferStore};
use tesseract_orchestrator::transfer::{Reconciler, TransferOrchestrator};
use tesseract_orchestrator::wallet::{LocalWalletProvider, WalletProvider};
use tesseract_orchestrator::OrchestratorContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log format can follow it
    let settings = Settings::load()?;
    init_logging(settings.orchestrator.log_format);

    info!(
        "Starting Tesseract Orchestrator v{} ({})",
        env!("CARGO_PKG_VERSION"),
        settings.orchestrator.instance_id
    );
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let memory_only = std::env::args().any(|arg| arg == "--memory");

    // Transfer store
    let store: Arc<dyn TransferStore> = match (&settings.database, memory_only) {
        (Some(database), false) => {
            let store = PostgresStore::new(database)
                .await
                .context("Failed to connect to database")?;
            info!("Database connection established");

            store
                .run_migrations()
                .await
                .context("Failed to run database migrations")?;
            info!("Database migrations complete");
            Arc::new(store)
        }
        _ => {
            warn!("No database configured; transfer records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // Chains and wallet
    let registry = Arc::new(settings.registry()?);
    let connector = Arc::new(HttpConnector::new(&settings.orchestrator));
    let wallet = LocalWalletProvider::from_config(&settings.wallet)
        .context("Failed to load wallet")?;
    let ctx = OrchestratorContext::init(
        registry,
        connector,
        Some(Arc::new(wallet) as Arc<dyn WalletProvider>),
    );
    let address = ctx
        .connect()
        .await
        .context("Failed to connect wallet session")?;
    info!("Wallet session connected as {:?}", address);

    let per_chain_timeout = Some(settings.orchestrator.per_chain_timeout());
    let transfers = Arc::new(TransferOrchestrator::new(ctx.clone(), store.clone()));
    let balances = Arc::new(BalanceAggregator::new(ctx.clone(), per_chain_timeout));

    let prices = StaticPriceSource::from_config(&settings.prices)
        .context("Failed to load price table")?;
    info!("Loaded {} configured prices", settings.prices.len());
    let arbitrage = Arc::new(ArbitrageEngine::new(
        transfers.clone(),
        Arc::new(prices),
        Arc::new(FixedCostModel::from_config(&settings.arbitrage)),
        settings.arbitrage.min_profit,
        per_chain_timeout,
    ));
    let rebalancer = Arc::new(RebalancingPlanner::new(
        transfers.clone(),
        settings.rebalance.clone(),
        per_chain_timeout,
    ));

    let reconciler = Arc::new(Reconciler::new(
        transfers.clone(),
        store.clone(),
        Duration::from_secs(settings.orchestrator.reconcile_interval_secs),
        settings.orchestrator.max_mint_attempts,
        Duration::from_secs(settings.orchestrator.stale_lock_secs),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            ctx: ctx.clone(),
            transfers: transfers.clone(),
            balances: balances.clone(),
            store: store.clone(),
            arbitrage,
            rebalancer,
        };
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

    // Start reconciler
    let reconciler_handle = tokio::spawn({
        let reconciler = reconciler.clone();
        async move {
            if let Err(e) = reconciler.run().await {
                error!("Reconciler error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let ctx = ctx.clone();
        let store = store.clone();
        let balances = balances.clone();
        let interval = settings.orchestrator.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                // Check chain connections
                for (chain_id, healthy) in ctx.connections.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                // Check transfer store
                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                }

                for outcome in balances.get_all_balances(address).await {
                    if let Some(balance) = outcome.ok() {
                        metrics::record_wallet_balance(
                            balance.chain_id,
                            balance.amount.to_f64().unwrap_or_default(),
                        );
                    }
                }
            }
        }
    });

    info!("Tesseract Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    reconciler.stop().await;
    ctx.dispose().await;

    // Abort background tasks
    api_handle.abort();
    reconciler_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Tesseract Orchestrator stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tesseract_orchestrator=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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

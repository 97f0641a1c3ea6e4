use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chroma_faucet::asset_migration::{self, MigrationCache};
use chroma_faucet::config::FaucetConfig;
use chroma_faucet::eligibility::EligibilityEngine;
use chroma_faucet::http;
use chroma_faucet::rng::RandomSource;
use chroma_faucet::scheduler::DistributionScheduler;
use chroma_faucet::state::AppState;
use chroma_faucet::wallet::{WalletPort, rpc::WalletRpcClient};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Arc::new(FaucetConfig::load().context("Failed to load configuration")?);
    let database = connect_database(&config).await?;
    run_migrations(&database).await?;

    let wallet: Arc<dyn WalletPort> = Arc::new(
        WalletRpcClient::new(&config.wallet.rpc_url, config.wallet.request_timeout())
            .context("Failed to initialize wallet RPC client")?,
    );
    verify_asset_catalog(wallet.as_ref(), &config).await?;

    let migration_cache = Arc::new(MigrationCache::new());
    asset_migration::run_boot_migration(&database, &config, &migration_cache)
        .await
        .context("Boot-time asset migration failed")?;

    let rng = Arc::new(RandomSource::from_entropy());
    let eligibility = Arc::new(EligibilityEngine::new(
        database.clone(),
        Arc::clone(&config),
        Arc::clone(&migration_cache),
        Arc::clone(&rng),
    ));

    let scheduler = DistributionScheduler::new(
        database.clone(),
        Arc::clone(&wallet),
        Arc::clone(&config),
        Arc::clone(&rng),
    );
    let scheduler_handle = scheduler.handle();

    let app_state = AppState::new(
        database.clone(),
        Arc::clone(&config),
        Arc::clone(&wallet),
        Arc::clone(&migration_cache),
        Arc::clone(&eligibility),
        scheduler_handle,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!(faucet = %config.faucet.name, "faucet listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = scheduler_task.await {
        error!("Scheduler task join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_database(config: &FaucetConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.database.max_connections >= config.database.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );
    assert!(
        config.database.max_connections <= 128,
        "Connection pool oversized"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to database")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

/// Refuse to start when the catalog references an asset the wallet does not
/// hold.
async fn verify_asset_catalog(wallet: &dyn WalletPort, config: &FaucetConfig) -> Result<()> {
    let known: BTreeSet<String> = wallet
        .list_assets()
        .await
        .map_err(|err| anyhow::anyhow!("wallet asset listing failed: {err}"))?
        .into_iter()
        .map(|record| record.asset_id)
        .collect();

    let mut missing = Vec::new();
    for (group_name, group) in &config.assets {
        for asset in &group.assets {
            if !known.contains(&asset.asset_id) {
                missing.push(format!("{group_name}/{}", asset.asset_id));
            }
        }
    }
    if !missing.is_empty() {
        bail!("configured assets missing from wallet: {}", missing.join(", "));
    }
    info!(assets = known.len(), "asset catalog verified against wallet");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}

//! Proof-of-Work Ledger - Main Application
//!
//! Opens the ledger, serves the HTTP API and optionally runs the mining pool.

use anyhow::{anyhow, Context};
use powledger::{
    api::{build_api_router, AppState},
    client::RemoteNode,
    config::Config,
    ledger::{JsonFileStore, Ledger},
    node::Node,
    utils::init_logging,
    wallet::Wallet,
    worker::{WorkSource, WorkerPool},
    Address, APP_DESCRIPTION, APP_NAME, APP_VERSION,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().await.context("Failed to load configuration")?;

    // Handle special commands
    if config.info {
        print_info();
        return Ok(());
    }

    if config.generate_key {
        generate_and_print_keypair(config.wallet_file.as_deref())?;
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(config.log_level, config.log_format, config.log_file.as_deref())?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        data_dir = %config.data_dir.display(),
        listen = %config.listen,
        workers = config.worker_count(),
        remote = config.node.as_deref().unwrap_or("none"),
        "Configuration loaded"
    );

    let miner = resolve_miner(&config)?;

    let store = JsonFileStore::open(&config.data_dir, config.snapshot_interval, config.snapshot_retain)?;
    let ledger = Ledger::open(config.chain_params()?, Arc::new(store)).context("Failed to open ledger")?;
    let node = Node::new(Arc::new(ledger));

    let source: Arc<dyn WorkSource> = match &config.node {
        Some(url) => Arc::new(
            RemoteNode::new(url, config.http_timeout_duration())?.with_backoff_config(config.backoff_config()),
        ),
        None => Arc::new(node.clone()),
    };
    let pool = Arc::new(WorkerPool::new(source, config.pool_config()?));

    if config.mine {
        let miner = miner
            .clone()
            .ok_or_else(|| anyhow!("--mine requires --miner-address or --wallet-file"))?;
        pool.start(miner).await?;
    }

    let app = build_api_router(AppState {
        node,
        pool: Arc::clone(&pool),
        default_miner: miner,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr()?)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(address = %listener.local_addr()?, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.stop().await;
    info!("Shutdown complete");
    Ok(())
}

/// Reward address from --miner-address, falling back to the wallet file
fn resolve_miner(config: &Config) -> anyhow::Result<Option<Address>> {
    if let Some(address) = config.miner_address()? {
        return Ok(Some(address));
    }
    match &config.wallet_file {
        Some(path) if path.exists() => {
            let wallet = Wallet::load(path).with_context(|| format!("Failed to load wallet {}", path.display()))?;
            Ok(Some(wallet.address().clone()))
        }
        _ => Ok(None),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Generate a wallet, print it and optionally save it
fn generate_and_print_keypair(wallet_file: Option<&Path>) -> anyhow::Result<()> {
    let wallet = Wallet::generate();
    println!("address: {}", wallet.address());
    println!("secret:  {}", wallet.secret_hex());
    println!();
    println!("IMPORTANT: Keep your secret key secure!");

    if let Some(path) = wallet_file {
        wallet.save(path)?;
        println!("Wallet written to {}", path.display());
    }
    Ok(())
}

/// Print current configuration
fn print_configuration(config: &Config) -> anyhow::Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_config_printing() {
        let config = Config::try_parse_from(["powledger", "--workers", "2"]).unwrap();
        assert!(print_configuration(&config).is_ok());
    }

    #[test]
    fn test_generate_key_writes_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        generate_and_print_keypair(Some(&path)).unwrap();

        let config = Config::try_parse_from([
            "powledger",
            "--wallet-file",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let miner = resolve_miner(&config).unwrap().unwrap();
        assert_eq!(miner, Wallet::load(&path).unwrap().address().clone());
    }
}

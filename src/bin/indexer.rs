//! Pool indexer: follows every configured pool contract and serves proof inputs over HTTP.
//!
//! Usage:
//!   indexer --config ./indexer.toml
//!
//! Each pool gets its own sync engine task. A pool that hits an unrecoverable error is
//! reported as `halted` on `/health` while the others keep running. Ctrl-C checkpoints
//! every pool and exits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pool_indexer::adapters::ethereum::EthereumPoolSource;
use pool_indexer::adapters::file_store::JsonFileCheckpointStore;
use pool_indexer::config::IndexerConfig;
use pool_indexer::pool::Pool;
use pool_indexer::registry::PoolRegistry;
use pool_indexer::server;
use pool_indexer::sync::SyncEngine;

#[derive(clap::Parser)]
#[command(name = "indexer", about = "Commitment-tree and nullifier indexer")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./indexer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // ── Load config ───────────────────────────────────────────────────────────
    let config = IndexerConfig::load(&args.config).unwrap_or_else(|e| {
        error!(path = %args.config.display(), "cannot load config: {e}");
        std::process::exit(1);
    });
    info!(pools = config.pools.len(), store = %config.store.dir.display(), "config loaded");

    let store = Arc::new(JsonFileCheckpointStore::new(&config.store.dir));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Pools and sync engines ────────────────────────────────────────────────
    let mut registry = PoolRegistry::new();
    let mut engines = Vec::with_capacity(config.pools.len());

    for pool_config in &config.pools {
        let address = pool_config.address;
        let params = pool_config.params().unwrap_or_else(|e| {
            error!(pool = %address, "invalid pool config: {e}");
            std::process::exit(1);
        });
        let pool = Arc::new(Pool::new(params).unwrap_or_else(|e| {
            error!(pool = %address, "cannot build pool: {e}");
            std::process::exit(1);
        }));
        let chain =
            EthereumPoolSource::new(&pool_config.rpc_url, address, pool_config.hasher_address)
                .unwrap_or_else(|e| {
                    error!(pool = %address, "cannot create RPC adapter: {e}");
                    std::process::exit(1);
                });

        registry.register(Arc::clone(&pool)).unwrap_or_else(|e| {
            error!("{e}");
            std::process::exit(1);
        });

        let engine = SyncEngine::new(pool, Arc::new(chain), Arc::clone(&store), config.sync.clone())
            .with_shutdown(shutdown_rx.clone());
        engines.push(tokio::spawn(engine.run()));

        info!(
            pool = %address,
            depth = pool_config.depth,
            hasher = %pool_config.hasher,
            deployment_block = pool_config.deployment_block,
            "pool registered"
        );
    }

    // ── HTTP server ───────────────────────────────────────────────────────────
    let mut server_shutdown = shutdown_rx.clone();
    let (server_handle, bound_addr) = server::start_server(
        Arc::new(registry),
        config.server.listen_addr,
        async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        },
    )
    .await
    .unwrap_or_else(|e| {
        error!(addr = %config.server.listen_addr, "cannot start server: {e}");
        std::process::exit(1);
    });
    info!(%bound_addr, "HTTP server listening");

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    for engine in engines {
        match engine.await {
            Ok(Ok(())) => {}
            // Already logged by the engine when it halted.
            Ok(Err(_)) => {}
            Err(e) => warn!("sync task panicked: {e}"),
        }
    }
    if let Err(e) = server_handle.await {
        warn!("server task panicked: {e}");
    }
    info!("stopped");
}

//! rpcwatcher: a fleet-wide transaction lifecycle tracker for Tendermint
//! chains. Watches every enabled chain's WebSocket event stream, classifies
//! transfer/IBC/liquidity events, and keeps the ticket store current.

mod config;
mod event_source;
mod grpc;
mod http_client;
mod profiling;
mod registry;
mod ticket_store;

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rpcwatcher_core::cache_refresher::CacheRefresher;
use rpcwatcher_core::supervisor::{Supervisor, SupervisorDeps};

use config::Config;
use event_source::TendermintEventSourceFactory;
use grpc::GrpcLiquidityClient;
use http_client::ReqwestBlockResultsClient;
use registry::PgChainRegistry;
use ticket_store::RedisTicketStore;

/// The chain whose liquidity pools, params and bank supply are cached on
/// every block, per `original_source/rpcwatcher/watcher.go`'s `HandleCosmosHubBlock`.
const DESIGNATED_CHAIN: &str = "cosmos-hub";

#[derive(Parser, Debug)]
#[command(name = "rpcwatcher")]
#[command(version, about = "Fleet-wide transaction lifecycle tracker", long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _args = Args::parse();

    let config = Config::from_env().map_err(|e| {
        eprintln!("configuration error: {e}");
        e
    })?;

    init_tracing(config.debug, config.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting rpcwatcher");
    tracing::debug!(api_url = %config.api_url, "configuration loaded");

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_connection_url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to connect to registry database");
            e
        })?;

    let registry = Arc::new(PgChainRegistry::new(db_pool.clone()));
    let store = Arc::new(RedisTicketStore::connect(&config.redis_url).await.map_err(|e| {
        tracing::error!(error = %e, "failed to connect to redis");
        anyhow::Error::from(e)
    })?);
    let source_factory = Arc::new(TendermintEventSourceFactory);
    let block_results = Arc::new(ReqwestBlockResultsClient::new());
    let grpc_client = Arc::new(GrpcLiquidityClient::new());
    let cache_refresher = Arc::new(CacheRefresher::new(block_results, grpc_client, store.clone()));

    if config.debug {
        let listen_addr = config.profiling_server_url.clone();
        tokio::spawn(async move {
            if let Err(e) = profiling::serve(&listen_addr).await {
                tracing::error!(error = %e, "profiling server exited");
            }
        });
    }

    let deps = SupervisorDeps {
        registry,
        store,
        source_factory,
        cache_refresher: Some(cache_refresher),
        designated_chain: DESIGNATED_CHAIN.to_string(),
    };

    let mut supervisor = Supervisor::new(deps);
    supervisor.bootstrap().await;

    tokio::select! {
        _ = supervisor.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, exiting");
        }
    }

    db_pool.close().await;
    Ok(())
}

/// Waits for SIGTERM or SIGINT (Ctrl+C). No SIGHUP reload here: unlike the
/// teacher's config-file setup, chain topology lives in the registry
/// database and is already picked up by the supervisor's own reconciliation
/// tick (§4.E), so there is nothing a reload would need to push.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}

fn init_tracing(debug: bool, json_logs: bool) {
    let default_filter = if debug { "debug,sqlx=info" } else { "info,sqlx=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

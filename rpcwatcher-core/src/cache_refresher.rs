//! The cache refresher (§4.F): for every new block observed on the chain
//! designated to own liquidity-module bookkeeping, fetches `block_results`
//! over HTTP and liquidity pools/params/bank total supply over gRPC, and
//! writes them into the ticket store under well-known keys. Every sub-step
//! is best-effort: one failing does not abort the others.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::contracts::{BlockResultsClient, LiquidityClient, TicketStore};
use crate::watcher::T_BLOCK_GAP;

pub struct CacheRefresher {
    http: Arc<dyn BlockResultsClient>,
    grpc: Arc<dyn LiquidityClient>,
    store: Arc<dyn TicketStore>,
}

impl CacheRefresher {
    pub fn new(
        http: Arc<dyn BlockResultsClient>,
        grpc: Arc<dyn LiquidityClient>,
        store: Arc<dyn TicketStore>,
    ) -> Self {
        Self { http, grpc, store }
    }

    /// Runs one refresh cycle for `height` on the given chain's endpoints.
    pub async fn refresh(&self, rpc_endpoint: &str, grpc_addr: &str, height: i64) {
        tokio::time::sleep(T_BLOCK_GAP).await;

        match self.http.block_results(rpc_endpoint, height).await {
            Ok(body) => {
                if let Err(e) = self.store.blocks().add(&body, height).await {
                    error!(height, error = %e, "cannot set block to cache");
                }
            }
            Err(e) => {
                error!(height, error = %e, "cannot query node for block data");
                return;
            }
        }

        self.refresh_liquidity(grpc_addr, height).await;
    }

    async fn refresh_liquidity(&self, grpc_addr: &str, height: i64) {
        match self.grpc.liquidity_pools(grpc_addr).await {
            Ok(value) => self.cache_json("pools", &value, height).await,
            Err(e) => error!(height, error = %e, "cannot get liquidity pools"),
        }

        match self.grpc.liquidity_params(grpc_addr).await {
            Ok(value) => self.cache_json("params", &value, height).await,
            Err(e) => error!(height, error = %e, "cannot get liquidity params"),
        }

        match self.grpc.total_supply(grpc_addr).await {
            Ok(value) => self.cache_json("supply", &value, height).await,
            Err(e) => error!(height, error = %e, "cannot get total supply"),
        }
    }

    async fn cache_json(&self, key: &str, value: &serde_json::Value, height: i64) {
        let body = match serde_json::to_string(value) {
            Ok(body) => body,
            Err(e) => {
                error!(height, key, error = %e, "cannot marshal cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set_with_expiry(key, &body, Duration::ZERO).await {
            warn!(height, key, error = %e, "cannot set cache entry");
        }
    }
}

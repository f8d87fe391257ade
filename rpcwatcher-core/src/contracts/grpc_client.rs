//! The gRPC contract used by the cache refresher: liquidity module pools and
//! params, plus the bank module's total supply.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrpcClientError {
    #[error("cannot dial {address}: {reason}")]
    Dial { address: String, reason: String },
    #[error("query failed: {0}")]
    Query(String),
    #[error("cannot marshal response: {0}")]
    Marshal(String),
}

#[async_trait]
pub trait LiquidityClient: Send + Sync {
    /// Opens (and is expected to close on drop) a channel to `grpc_addr` for
    /// the duration of one refresh cycle.
    async fn liquidity_pools(&self, grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError>;
    async fn liquidity_params(&self, grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError>;
    async fn total_supply(&self, grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError>;
}

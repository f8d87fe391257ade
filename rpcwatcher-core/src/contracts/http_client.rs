//! The HTTP contract used by the cache refresher: a single GET against a
//! node's `block_results` endpoint.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("endpoint returned non-200 status {0}")]
    NonOk(u16),
    #[error("cannot read response body: {0}")]
    Body(String),
}

#[async_trait]
pub trait BlockResultsClient: Send + Sync {
    /// GET `{rpc_endpoint}/block_results?height=N`, returning the raw body.
    async fn block_results(&self, rpc_endpoint: &str, height: i64) -> Result<Vec<u8>, HttpClientError>;
}

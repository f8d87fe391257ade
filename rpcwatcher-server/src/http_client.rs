//! Concrete [`BlockResultsClient`]: a plain `GET {rpc}/block_results?height=N`
//! against the node's Tendermint RPC, same endpoint `HandleCosmosHubBlock`
//! hit in the original.

use async_trait::async_trait;
use rpcwatcher_core::contracts::{BlockResultsClient, HttpClientError};

pub struct ReqwestBlockResultsClient {
    http: reqwest::Client,
}

impl ReqwestBlockResultsClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for ReqwestBlockResultsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockResultsClient for ReqwestBlockResultsClient {
    async fn block_results(&self, rpc_endpoint: &str, height: i64) -> Result<Vec<u8>, HttpClientError> {
        let url = format!("{rpc_endpoint}/block_results?height={height}");
        let response =
            self.http.get(&url).send().await.map_err(|e| HttpClientError::Request(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(HttpClientError::NonOk(status.as_u16()));
        }

        response.bytes().await.map(|b| b.to_vec()).map_err(|e| HttpClientError::Body(e.to_string()))
    }
}

//! Concrete [`LiquidityClient`]: dials the node's gRPC endpoint fresh for
//! every call, mirroring the original's per-refresh `grpc.Dial`/`Close`.

use async_trait::async_trait;
use cosmos_sdk_proto::cosmos::bank::v1beta1::query_client::QueryClient as BankQueryClient;
use cosmos_sdk_proto::cosmos::bank::v1beta1::QueryTotalSupplyRequest;
use rpcwatcher_core::contracts::{GrpcClientError, LiquidityClient};
use tonic::transport::{Channel, Endpoint};

use crate::grpc::liquidity_proto::query_client::QueryClient as LiquidityQueryClient;
use crate::grpc::liquidity_proto::{QueryLiquidityPoolsRequest, QueryParamsRequest};

#[derive(Default)]
pub struct GrpcLiquidityClient;

impl GrpcLiquidityClient {
    pub fn new() -> Self {
        Self
    }

    async fn dial(&self, grpc_addr: &str) -> Result<Channel, GrpcClientError> {
        let uri = format!("http://{grpc_addr}");
        Endpoint::from_shared(uri.clone())
            .map_err(|e| GrpcClientError::Dial { address: grpc_addr.to_string(), reason: e.to_string() })?
            .connect()
            .await
            .map_err(|e| GrpcClientError::Dial { address: grpc_addr.to_string(), reason: e.to_string() })
    }
}

#[async_trait]
impl LiquidityClient for GrpcLiquidityClient {
    async fn liquidity_pools(&self, grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError> {
        let channel = self.dial(grpc_addr).await?;
        let mut client = LiquidityQueryClient::new(channel);
        let response = client
            .liquidity_pools(QueryLiquidityPoolsRequest {})
            .await
            .map_err(|e| GrpcClientError::Query(e.to_string()))?
            .into_inner();
        serde_json::to_value(response).map_err(|e| GrpcClientError::Marshal(e.to_string()))
    }

    async fn liquidity_params(&self, grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError> {
        let channel = self.dial(grpc_addr).await?;
        let mut client = LiquidityQueryClient::new(channel);
        let response = client
            .params(QueryParamsRequest {})
            .await
            .map_err(|e| GrpcClientError::Query(e.to_string()))?
            .into_inner();
        serde_json::to_value(response).map_err(|e| GrpcClientError::Marshal(e.to_string()))
    }

    async fn total_supply(&self, grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError> {
        let channel = self.dial(grpc_addr).await?;
        let mut client = BankQueryClient::new(channel);
        let response = client
            .total_supply(QueryTotalSupplyRequest { pagination: None })
            .await
            .map_err(|e| GrpcClientError::Query(e.to_string()))?
            .into_inner();

        // cosmos-sdk-proto's generated bank types don't derive Serialize, so
        // the response is flattened into plain JSON by hand instead of
        // pulling in a second prost/tonic-build pass just for this field.
        let supply: Vec<serde_json::Value> = response
            .supply
            .into_iter()
            .map(|coin| serde_json::json!({ "denom": coin.denom, "amount": coin.amount }))
            .collect();
        Ok(serde_json::json!({ "supply": supply, "pagination": response.pagination.is_some() }))
    }
}

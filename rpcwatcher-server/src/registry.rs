//! Concrete [`ChainRegistry`] backed by the chain registry Postgres database
//! (`cns.chains`), mirroring `database.Instance` in
//! `original_source/rpcwatcher/database`. Uses the runtime-checked
//! `sqlx::query_as` rather than the teacher's `query_as!` macro: the jsonb
//! columns here (`primary_channel`, `denoms`, `node_info`) need custom
//! deserialization the macro can't express, and there is no live database
//! in this workspace to prepare an offline query cache against.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;

use rpcwatcher_core::contracts::{ChainRegistry, RegistryError};
use rpcwatcher_core::denom;
use rpcwatcher_core::entities::{ChainDescriptor, ChannelQuery, Denom};

#[derive(Debug, Default, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DenomRow {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    precision: u32,
}

#[derive(sqlx::FromRow)]
struct ChainRow {
    chain_name: String,
    enabled: bool,
    primary_channel: Json<HashMap<String, String>>,
    denoms: Json<Vec<DenomRow>>,
    node_info: Json<NodeInfo>,
}

impl From<ChainRow> for ChainDescriptor {
    fn from(row: ChainRow) -> Self {
        ChainDescriptor {
            node_rpc_url: format!("http://{}:26657", row.chain_name),
            node_grpc_addr: row.node_info.0.endpoint,
            name: row.chain_name,
            enabled: row.enabled,
            primary_channels: row.primary_channel.0,
            denoms: row
                .denoms
                .0
                .into_iter()
                .map(|d| Denom {
                    is_pool_coin: denom::is_pool_coin(&d.name),
                    is_ibc_token: denom::is_ibc_token(&d.name),
                    name: d.name,
                    display_name: d.display_name,
                    precision: d.precision,
                })
                .collect(),
        }
    }
}

const SELECT_CHAIN_COLUMNS: &str =
    "chain_name, enabled, primary_channel, denoms, node_info FROM cns.chains";

pub struct PgChainRegistry {
    pool: PgPool,
}

impl PgChainRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainRegistry for PgChainRegistry {
    #[tracing::instrument(skip(self), err)]
    async fn chains(&self) -> Result<Vec<ChainDescriptor>, RegistryError> {
        let rows: Vec<ChainRow> =
            sqlx::query_as(&format!("SELECT {SELECT_CHAIN_COLUMNS}"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        Ok(rows.into_iter().map(ChainDescriptor::from).collect())
    }

    #[tracing::instrument(skip(self), err)]
    async fn chain(&self, name: &str) -> Result<ChainDescriptor, RegistryError> {
        let row: Option<ChainRow> =
            sqlx::query_as(&format!("SELECT {SELECT_CHAIN_COLUMNS} WHERE chain_name = $1"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        row.map(ChainDescriptor::from).ok_or_else(|| RegistryError::ChainNotFound(name.to_string()))
    }

    /// `primary_channel` maps counterparty chain name -> channel id; this
    /// inverts that map to find which counterparty owns `src_channel`.
    #[tracing::instrument(skip(self), err)]
    async fn get_counterparty(
        &self,
        chain: &str,
        src_channel: &str,
    ) -> Result<Vec<ChannelQuery>, RegistryError> {
        let descriptor = self.chain(chain).await?;

        Ok(descriptor
            .primary_channels
            .into_iter()
            .filter(|(_, channel)| channel == src_channel)
            .map(|(counterparty, channel_name)| ChannelQuery {
                chain_name: chain.to_string(),
                counterparty,
                channel_name,
            })
            .collect())
    }

    #[tracing::instrument(skip(self, chain), err)]
    async fn update_denoms(&self, chain: &ChainDescriptor) -> Result<(), RegistryError> {
        let denoms = chain
            .denoms
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "display_name": d.display_name,
                    "precision": d.precision,
                })
            })
            .collect::<Vec<_>>();

        let result = sqlx::query("UPDATE cns.chains SET denoms = $1 WHERE chain_name = $2")
            .bind(serde_json::Value::Array(denoms))
            .bind(&chain.name)
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::ChainNotFound(chain.name.clone()));
        }
        Ok(())
    }
}

//! The chain registry database contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::entities::{ChainDescriptor, ChannelQuery};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("chain {0} not found")]
    ChainNotFound(String),
    #[error("no counterparty registered for {chain}/{channel}")]
    NoCounterparty { chain: String, channel: String },
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ChainRegistry: Send + Sync {
    async fn chains(&self) -> Result<Vec<ChainDescriptor>, RegistryError>;
    async fn chain(&self, name: &str) -> Result<ChainDescriptor, RegistryError>;
    async fn get_counterparty(
        &self,
        chain: &str,
        src_channel: &str,
    ) -> Result<Vec<ChannelQuery>, RegistryError>;
    async fn update_denoms(&self, chain: &ChainDescriptor) -> Result<(), RegistryError>;
}

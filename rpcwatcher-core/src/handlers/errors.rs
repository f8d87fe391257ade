use thiserror::Error;

use crate::contracts::{RegistryError, StoreError};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("cannot parse packet ack: {0}")]
    MalformedAck(String),
}

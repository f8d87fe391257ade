//! The ticket key/value store contract (§6.3). Redis-like semantics: plain
//! `set_with_expiry` for liveness bits and cache blobs, plus typed per-ticket
//! operations that are no-ops when the target ticket does not exist (except
//! `set_failed_with_err`, which may create a failure record regardless).

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::entities::{IbcKey, Ticket, TicketKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn create_ticket(&self, key: &TicketKey, owner: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &TicketKey) -> Result<bool, StoreError>;
    async fn exists_ibc(&self, key: &IbcKey) -> Result<bool, StoreError>;
    async fn get(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError>;

    /// `ttl == 0` means no expiry. Used both for chain liveness bits
    /// (`"true"` / `"false"` / `"resubscribing"`) and for cache entries
    /// (`pools`, `params`, `supply`).
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError>;

    async fn set_complete(&self, key: &TicketKey, height: i64) -> Result<(), StoreError>;

    /// Marks `key`'s ticket failed and appends exactly one history entry
    /// with `status: Failed` and `tx_hash` equal to `key.tx_hash`, unchanged.
    /// `log` is a diagnostic string for the backend's own structured log
    /// line; it must never be folded into the entry's `tx_hash` or otherwise
    /// surfaced through the typed history, since that history is returned
    /// to API clients verbatim and `tx_hash` is a parsed field there, not
    /// free text. Creates the ticket (as `Pending`, before this call
    /// overwrites it to `Failed`) if `key` has no ticket yet, same as a
    /// failure observed before any `create_ticket` ran for it.
    async fn set_failed_with_err(
        &self,
        key: &TicketKey,
        log: &str,
        height: i64,
    ) -> Result<(), StoreError>;

    /// Advances `local_key` to `transit` and registers the IBC correlation
    /// key so it resolves to the same ticket.
    #[allow(clippy::too_many_arguments)]
    async fn set_in_transit(
        &self,
        local_key: &TicketKey,
        counterparty: &str,
        channel: &str,
        sequence: &str,
        tx_hash: &str,
        chain: &str,
        height: i64,
    ) -> Result<(), StoreError>;

    async fn set_ibc_received(
        &self,
        key: &IbcKey,
        tx_hash: &str,
        chain: &str,
        height: i64,
    ) -> Result<(), StoreError>;
    async fn set_ibc_failed(
        &self,
        key: &IbcKey,
        tx_hash: &str,
        chain: &str,
        height: i64,
    ) -> Result<(), StoreError>;
    async fn set_ibc_ack_unlock(
        &self,
        key: &IbcKey,
        tx_hash: &str,
        chain: &str,
        height: i64,
    ) -> Result<(), StoreError>;
    async fn set_ibc_timeout_unlock(
        &self,
        key: &IbcKey,
        tx_hash: &str,
        chain: &str,
        height: i64,
    ) -> Result<(), StoreError>;

    async fn set_pool_swap_fees(
        &self,
        pool_id: &str,
        fee_amount: &str,
        fee_denom: &str,
    ) -> Result<(), StoreError>;

    fn blocks(&self) -> &dyn BlockCache;
}

#[async_trait]
pub trait BlockCache: Send + Sync {
    async fn add(&self, body: &[u8], height: i64) -> Result<(), StoreError>;
    async fn block(&self, height: i64) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set_last_block_time(&self, time: OffsetDateTime, height: i64) -> Result<(), StoreError>;
}

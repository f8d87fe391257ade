//! Concrete [`TicketStore`]/[`BlockCache`] backed by Redis (§6.3). No pack
//! example reaches for the `redis` crate, so this follows the crate's own
//! documented async idiom: a single shared `ConnectionManager` (transparent
//! reconnection, safe to clone across tasks) driven through `AsyncCommands`.
//!
//! Tickets are stored as a JSON blob per `ticket:{chain}:{tx_hash}` key; the
//! IBC correlation index is a plain string key pointing back at the owning
//! ticket key. Pool fees accumulate into a hash so repeated swaps add up
//! rather than overwrite.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use rpcwatcher_core::contracts::{BlockCache, StoreError, TicketStore};
use rpcwatcher_core::entities::{IbcKey, Ticket, TicketKey, TicketStatus, TxHashEntry};

fn ticket_key(key: &TicketKey) -> String {
    format!("ticket:{}:{}", key.chain_name, key.tx_hash)
}

fn ibc_index_key(key: &IbcKey) -> String {
    format!("ibcindex:{}:{}:{}", key.counterparty_chain, key.src_channel, key.sequence)
}

fn pool_fees_key(pool_id: &str) -> String {
    format!("pool:{pool_id}:fees")
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTxHashEntry {
    chain: String,
    status: String,
    tx_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTicket {
    status: String,
    history: Vec<WireTxHashEntry>,
    #[serde(default)]
    owner: String,
}

fn status_to_wire(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Pending => "pending",
        TicketStatus::Transit => "transit",
        TicketStatus::Complete => "complete",
        TicketStatus::Failed => "failed",
        TicketStatus::IbcReceiveSuccess => "IBC_receive_success",
        TicketStatus::IbcReceiveFailed => "IBC_receive_failed",
        TicketStatus::TokensUnlockedAck => "Tokens_unlocked_ack",
        TicketStatus::TokensUnlockedTimeout => "Tokens_unlocked_timeout",
    }
}

fn status_from_wire(value: &str) -> TicketStatus {
    match value {
        "transit" => TicketStatus::Transit,
        "complete" => TicketStatus::Complete,
        "failed" => TicketStatus::Failed,
        "IBC_receive_success" => TicketStatus::IbcReceiveSuccess,
        "IBC_receive_failed" => TicketStatus::IbcReceiveFailed,
        "Tokens_unlocked_ack" => TicketStatus::TokensUnlockedAck,
        "Tokens_unlocked_timeout" => TicketStatus::TokensUnlockedTimeout,
        _ => TicketStatus::Pending,
    }
}

impl From<&WireTicket> for Ticket {
    fn from(wire: &WireTicket) -> Self {
        Ticket {
            status: status_from_wire(&wire.status),
            history: wire
                .history
                .iter()
                .map(|e| TxHashEntry {
                    chain: e.chain.clone(),
                    status: status_from_wire(&e.status),
                    tx_hash: e.tx_hash.clone(),
                })
                .collect(),
        }
    }
}

pub struct RedisTicketStore {
    conn: ConnectionManager,
    blocks: RedisBlockCache,
}

impl RedisTicketStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(format!("redis://{redis_url}"))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { blocks: RedisBlockCache { conn: conn.clone() }, conn })
    }

    async fn read_ticket(&self, key: &str) -> Result<Option<WireTicket>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        match raw {
            Some(body) => {
                serde_json::from_str(&body).map(Some).map_err(|e| StoreError::Backend(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn write_ticket(&self, key: &str, ticket: &WireTicket) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(ticket).map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.set::<_, _, ()>(key, body).await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn advance_ibc(
        &self,
        key: &IbcKey,
        status: TicketStatus,
        tx_hash: &str,
        chain: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let owner_key: Option<String> =
            conn.get(ibc_index_key(key)).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        let Some(owner_key) = owner_key else {
            warn!(%key, "no ticket registered for IBC correlation key, dropping");
            return Ok(());
        };

        let Some(mut ticket) = self.read_ticket(&owner_key).await? else { return Ok(()) };
        ticket.status = status_to_wire(status).to_string();
        ticket.history.push(WireTxHashEntry {
            chain: chain.to_string(),
            status: status_to_wire(status).to_string(),
            tx_hash: tx_hash.to_string(),
        });
        self.write_ticket(&owner_key, &ticket).await
    }
}

#[async_trait]
impl TicketStore for RedisTicketStore {
    async fn create_ticket(&self, key: &TicketKey, owner: &str) -> Result<(), StoreError> {
        let wire = WireTicket {
            status: status_to_wire(TicketStatus::Pending).to_string(),
            history: Vec::new(),
            owner: owner.to_string(),
        };
        self.write_ticket(&ticket_key(key), &wire).await
    }

    async fn exists(&self, key: &TicketKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.exists(ticket_key(key)).await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn exists_ibc(&self, key: &IbcKey) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.exists(ibc_index_key(key)).await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError> {
        Ok(self.read_ticket(&ticket_key(key)).await?.as_ref().map(Ticket::from))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            conn.set::<_, _, ()>(key, value).await.map_err(|e| StoreError::Backend(e.to_string()))
        } else {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        }
    }

    async fn set_complete(&self, key: &TicketKey, _height: i64) -> Result<(), StoreError> {
        let Some(mut ticket) = self.read_ticket(&ticket_key(key)).await? else { return Ok(()) };
        ticket.status = status_to_wire(TicketStatus::Complete).to_string();
        self.write_ticket(&ticket_key(key), &ticket).await
    }

    async fn set_failed_with_err(&self, key: &TicketKey, log: &str, height: i64) -> Result<(), StoreError> {
        warn!(chain = %key.chain_name, tx_hash = %key.tx_hash, height, %log, "ticket failed");
        let mut ticket = self.read_ticket(&ticket_key(key)).await?.unwrap_or(WireTicket {
            status: status_to_wire(TicketStatus::Pending).to_string(),
            history: Vec::new(),
            owner: String::new(),
        });
        ticket.status = status_to_wire(TicketStatus::Failed).to_string();
        ticket.history.push(WireTxHashEntry {
            chain: key.chain_name.clone(),
            status: status_to_wire(TicketStatus::Failed).to_string(),
            tx_hash: key.tx_hash.clone(),
        });
        self.write_ticket(&ticket_key(key), &ticket).await
    }

    async fn set_in_transit(
        &self,
        local_key: &TicketKey,
        counterparty: &str,
        channel: &str,
        sequence: &str,
        tx_hash: &str,
        chain: &str,
        _height: i64,
    ) -> Result<(), StoreError> {
        let Some(mut ticket) = self.read_ticket(&ticket_key(local_key)).await? else { return Ok(()) };
        ticket.status = status_to_wire(TicketStatus::Transit).to_string();
        ticket.history.push(WireTxHashEntry {
            chain: chain.to_string(),
            status: status_to_wire(TicketStatus::Transit).to_string(),
            tx_hash: tx_hash.to_string(),
        });
        self.write_ticket(&ticket_key(local_key), &ticket).await?;

        let mut conn = self.conn.clone();
        let ibc_key = IbcKey::new(counterparty, channel, sequence);
        conn.set::<_, _, ()>(ibc_index_key(&ibc_key), ticket_key(local_key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set_ibc_received(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::IbcReceiveSuccess, tx_hash, chain).await
    }

    async fn set_ibc_failed(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::IbcReceiveFailed, tx_hash, chain).await
    }

    async fn set_ibc_ack_unlock(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::TokensUnlockedAck, tx_hash, chain).await
    }

    async fn set_ibc_timeout_unlock(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::TokensUnlockedTimeout, tx_hash, chain).await
    }

    /// Accumulates into the pool's running fee total rather than
    /// overwriting it, so repeated swaps against the same pool add up.
    async fn set_pool_swap_fees(&self, pool_id: &str, fee_amount: &str, fee_denom: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = pool_fees_key(pool_id);

        let current: Option<String> =
            conn.hget(&key, fee_denom).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        let running: u128 = current.as_deref().unwrap_or("0").parse().unwrap_or(0);
        let added: u128 = fee_amount.parse().unwrap_or(0);

        conn.hset::<_, _, _, ()>(&key, fee_denom, (running + added).to_string())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn blocks(&self) -> &dyn BlockCache {
        &self.blocks
    }
}

pub struct RedisBlockCache {
    conn: ConnectionManager,
}

#[async_trait]
impl BlockCache for RedisBlockCache {
    async fn add(&self, body: &[u8], height: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(format!("block_results:{height}"), body)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn block(&self, height: i64) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(format!("block_results:{height}")).await.map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set_last_block_time(&self, time: OffsetDateTime, height: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let body = serde_json::json!({ "time": time.unix_timestamp(), "height": height }).to_string();
        conn.set::<_, _, ()>("last_block_time", body).await.map_err(|e| StoreError::Backend(e.to_string()))
    }
}

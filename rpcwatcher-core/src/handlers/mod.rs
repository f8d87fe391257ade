//! Per-variant handlers (§4.C): each reads the attributes it needs off the
//! raw event, looks up or computes a ticket key, and performs a single store
//! mutation. Missing expected attributes are logged and dropped, never a
//! panic.

pub mod errors;

use std::sync::Arc;

use kanau::processor::Processor;
use serde::Deserialize;
use tracing::{debug, warn};

pub use errors::HandlerError;

use crate::contracts::{ChainRegistry, TicketStore};
use crate::entities::{Denom, IbcKey, TicketKey};
use crate::events::{Event, EventData, RawEvent};

/// Acknowledgement payload carried in `write_acknowledgement.packet_ack`.
/// `AQ==` is the base64 encoding of a single success byte; anything else
/// carries an error message instead.
const ACK_SUCCESS: &str = "AQ==";

#[derive(Debug, Deserialize)]
struct Ack {
    result: String,
}

/// One classified event, bundled with enough context to handle it without
/// reaching back into the watcher.
pub struct Dispatch {
    pub chain: String,
    pub raw: RawEvent,
    pub classified: Event,
}

/// Bundles the store and registry every handler needs, plus the identity of
/// the chain designated for liquidity-module bookkeeping (`cosmos-hub` in
/// the reference deployment, but externalized as configuration).
pub struct HandlerSet {
    pub registry: Arc<dyn ChainRegistry>,
    pub store: Arc<dyn TicketStore>,
    pub designated_chain: String,
}

impl HandlerSet {
    pub fn new(
        registry: Arc<dyn ChainRegistry>,
        store: Arc<dyn TicketStore>,
        designated_chain: impl Into<String>,
    ) -> Self {
        Self { registry, store, designated_chain: designated_chain.into() }
    }

    fn tx_height(raw: &RawEvent) -> Option<i64> {
        match &raw.data {
            EventData::Tx { height, .. } => Some(*height),
            _ => None,
        }
    }

    fn tx_height_log(raw: &RawEvent) -> Option<(i64, &str)> {
        match &raw.data {
            EventData::Tx { height, log, .. } => Some((*height, log.as_str())),
            _ => None,
        }
    }

    fn block_height_time(raw: &RawEvent) -> Option<(i64, time::OffsetDateTime)> {
        match &raw.data {
            EventData::NewBlock { height, time } => Some((*height, *time)),
            _ => None,
        }
    }

    fn require<'a>(raw: &'a RawEvent, key: &'static str) -> Option<&'a str> {
        match raw.first(key) {
            Some(v) => Some(v),
            None => {
                warn!(attribute = key, "missing expected attribute");
                None
            }
        }
    }

    async fn handle_non_ibc(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let key = TicketKey::new(chain, tx_hash);
        let Some(height) = Self::tx_height(raw) else { return Ok(()) };
        if self.store.exists(&key).await? {
            self.store.set_complete(&key, height).await?;
        }
        Ok(())
    }

    async fn handle_failed(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let key = TicketKey::new(chain, tx_hash);
        let EventData::Tx { height, ref log, .. } = raw.data else { return Ok(()) };
        let message = format!("non-zero code on chain {chain}: {log}");
        self.store.set_failed_with_err(&key, &message, height).await?;
        Ok(())
    }

    async fn handle_create_pool(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        if chain != self.designated_chain {
            return Ok(());
        }
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let key = TicketKey::new(chain, tx_hash);
        let EventData::Tx { height, .. } = raw.data else { return Ok(()) };

        let Some(pool_coin_denom) = Self::require(raw, "create_pool.pool_coin_denom") else {
            return Ok(());
        };

        let mut descriptor = self.registry.chain(chain).await?;
        let new_denom = Denom {
            name: pool_coin_denom.to_string(),
            display_name: pool_coin_denom.to_string(),
            precision: 0,
            is_pool_coin: crate::denom::is_pool_coin(pool_coin_denom),
            is_ibc_token: crate::denom::is_ibc_token(pool_coin_denom),
        };

        match descriptor.denoms.iter_mut().find(|d| d.name == pool_coin_denom) {
            Some(existing) => *existing = new_denom,
            None => descriptor.denoms.push(new_denom),
        }

        self.registry.update_denoms(&descriptor).await?;
        self.store.set_complete(&key, height).await?;
        Ok(())
    }

    async fn handle_swap(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        if chain != self.designated_chain {
            return Ok(());
        }
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let key = TicketKey::new(chain, tx_hash);
        let EventData::Tx { height, .. } = raw.data else { return Ok(()) };

        let (Some(pool_id), Some(fee_amount), Some(fee_denom)) = (
            Self::require(raw, "swap_within_batch.pool_id"),
            Self::require(raw, "swap_within_batch.offer_coin_fee_amount"),
            Self::require(raw, "swap_within_batch.offer_coin_denom"),
        ) else {
            return Ok(());
        };

        self.store.set_pool_swap_fees(pool_id, fee_amount, fee_denom).await?;
        self.store.set_complete(&key, height).await?;
        Ok(())
    }

    async fn handle_ibc_send(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let key = TicketKey::new(chain, tx_hash);
        let EventData::Tx { height, .. } = raw.data else { return Ok(()) };

        let Some(port) = Self::require(raw, "send_packet.packet_src_port") else {
            return Ok(());
        };
        if port != "transfer" {
            debug!(chain, "send_packet port is not transfer, ignoring");
            return Ok(());
        }
        let (Some(src_channel), Some(sequence)) = (
            Self::require(raw, "send_packet.packet_src_channel"),
            Self::require(raw, "send_packet.packet_sequence"),
        ) else {
            return Ok(());
        };

        let counterparties = self.registry.get_counterparty(chain, src_channel).await?;
        let Some(counterparty) = counterparties.first() else {
            warn!(chain, src_channel, "no counterparty registered for channel");
            return Ok(());
        };

        self.store
            .set_in_transit(&key, &counterparty.counterparty, src_channel, sequence, tx_hash, chain, height)
            .await?;
        Ok(())
    }

    async fn handle_ibc_recv(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let EventData::Tx { height, .. } = raw.data else { return Ok(()) };

        let Some(port) = Self::require(raw, "recv_packet.packet_src_port") else {
            return Ok(());
        };
        if port != "transfer" {
            debug!(chain, "recv_packet port is not transfer, ignoring");
            return Ok(());
        }
        let (Some(src_channel), Some(sequence), Some(packet_ack)) = (
            Self::require(raw, "recv_packet.packet_src_channel"),
            Self::require(raw, "recv_packet.packet_sequence"),
            Self::require(raw, "write_acknowledgement.packet_ack"),
        ) else {
            return Ok(());
        };

        let ibc_key = IbcKey::new(chain, src_channel, sequence);
        if !self.store.exists_ibc(&ibc_key).await? {
            debug!(chain, %ibc_key, "bypassing key, event not sourced from us");
            return Ok(());
        }

        let ack: Ack = serde_json::from_str(packet_ack)
            .map_err(|e| HandlerError::MalformedAck(e.to_string()))?;

        if ack.result != ACK_SUCCESS {
            self.store.set_ibc_failed(&ibc_key, tx_hash, chain, height).await?;
        } else {
            self.store.set_ibc_received(&ibc_key, tx_hash, chain, height).await?;
        }
        Ok(())
    }

    async fn handle_ibc_timeout(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let EventData::Tx { height, .. } = raw.data else { return Ok(()) };

        let (Some(src_channel), Some(sequence)) = (
            Self::require(raw, "timeout_packet.packet_src_channel"),
            Self::require(raw, "timeout_packet.packet_sequence"),
        ) else {
            return Ok(());
        };

        let counterparties = self.registry.get_counterparty(chain, src_channel).await?;
        let Some(counterparty) = counterparties.first() else {
            warn!(chain, src_channel, "no counterparty registered for channel");
            return Ok(());
        };

        let ibc_key = IbcKey::new(&counterparty.counterparty, src_channel, sequence);
        if !self.store.exists_ibc(&ibc_key).await? {
            debug!(chain, %ibc_key, "bypassing key, event not sourced from us");
            return Ok(());
        }

        self.store.set_ibc_timeout_unlock(&ibc_key, tx_hash, chain, height).await?;
        Ok(())
    }

    async fn handle_ibc_ack(&self, chain: &str, raw: &RawEvent) -> Result<(), HandlerError> {
        let Some(tx_hash) = raw.first("tx.hash") else { return Ok(()) };
        let EventData::Tx { height, .. } = raw.data else { return Ok(()) };

        if !raw.has("fungible_token_packet.error") {
            // The receive path already recorded success; nothing to unlock.
            return Ok(());
        }

        let (Some(src_channel), Some(sequence)) = (
            Self::require(raw, "acknowledge_packet.packet_src_channel"),
            Self::require(raw, "acknowledge_packet.packet_sequence"),
        ) else {
            return Ok(());
        };

        let counterparties = self.registry.get_counterparty(chain, src_channel).await?;
        let Some(counterparty) = counterparties.first() else {
            warn!(chain, src_channel, "no counterparty registered for channel");
            return Ok(());
        };

        let ibc_key = IbcKey::new(&counterparty.counterparty, src_channel, sequence);
        if !self.store.exists_ibc(&ibc_key).await? {
            debug!(chain, %ibc_key, "bypassing key, event not sourced from us");
            return Ok(());
        }

        self.store.set_ibc_ack_unlock(&ibc_key, tx_hash, chain, height).await?;
        Ok(())
    }

    async fn handle_new_block(&self, raw: &RawEvent) -> Result<(), HandlerError> {
        let EventData::NewBlock { height, time } = raw.data else { return Ok(()) };
        self.store.blocks().set_last_block_time(time, height).await?;
        Ok(())
    }
}

impl Processor<Dispatch> for HandlerSet {
    type Output = ();
    type Error = HandlerError;

    async fn process(&self, input: Dispatch) -> Result<(), HandlerError> {
        let Dispatch { chain, raw, classified } = input;
        match classified {
            Event::NonIbcTx => self.handle_non_ibc(&chain, &raw).await,
            Event::FailedTx => self.handle_failed(&chain, &raw).await,
            Event::CreatePoolTx => self.handle_create_pool(&chain, &raw).await,
            Event::SwapTx => self.handle_swap(&chain, &raw).await,
            Event::IbcSend => self.handle_ibc_send(&chain, &raw).await,
            Event::IbcRecv => self.handle_ibc_recv(&chain, &raw).await,
            Event::IbcTimeout => self.handle_ibc_timeout(&chain, &raw).await,
            Event::IbcAck => self.handle_ibc_ack(&chain, &raw).await,
            Event::NewBlock => self.handle_new_block(&raw).await,
            Event::Ignore => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use time::OffsetDateTime;

    use super::*;
    use crate::entities::{ChainDescriptor, TicketStatus};
    use crate::testutil::{InMemoryChainRegistry, InMemoryTicketStore};

    fn tx(markers: &[(&str, &str)], code: u32, height: i64) -> RawEvent {
        let mut events: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in markers {
            events.insert((*k).to_string(), vec![(*v).to_string()]);
        }
        RawEvent { query: "tm.event='Tx'".into(), events, data: EventData::Tx { height, code, log: "boom".into() } }
    }

    fn hub_chain() -> ChainDescriptor {
        ChainDescriptor {
            name: "cosmos-hub".into(),
            enabled: true,
            node_rpc_url: "http://cosmos-hub:26657".into(),
            node_grpc_addr: "cosmos-hub:9090".into(),
            primary_channels: HashMap::new(),
            denoms: Vec::new(),
        }
    }

    fn set() -> (HandlerSet, Arc<InMemoryTicketStore>, Arc<InMemoryChainRegistry>) {
        let store = Arc::new(InMemoryTicketStore::new());
        let registry = Arc::new(InMemoryChainRegistry::new(vec![hub_chain()]));
        let handlers = HandlerSet::new(registry.clone(), store.clone(), "cosmos-hub");
        (handlers, store, registry)
    }

    /// S1: non-IBC transfer success.
    #[tokio::test]
    async fn non_ibc_transfer_completes() -> Result<(), HandlerError> {
        let (handlers, store, _registry) = set();
        let key = TicketKey::new("cosmos-hub", "HASH1");
        store.create_ticket(&key, "owner").await?;

        let event = tx(&[("tx.hash", "HASH1")], 0, 100);
        handlers.process(Dispatch { chain: "cosmos-hub".into(), raw: event, classified: Event::NonIbcTx }).await?;

        let ticket = store.get(&key).await?;
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Complete));
        Ok(())
    }

    /// S2: non-IBC transfer failure.
    #[tokio::test]
    async fn failed_tx_marks_failed() -> Result<(), HandlerError> {
        let (handlers, store, _registry) = set();
        let key = TicketKey::new("cosmos-hub", "HASH1");
        store.create_ticket(&key, "owner").await?;

        let event = tx(&[("tx.hash", "HASH1")], 19, 100);
        handlers.process(Dispatch { chain: "cosmos-hub".into(), raw: event, classified: Event::FailedTx }).await?;

        let ticket = store.get(&key).await?;
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Failed));
        Ok(())
    }

    /// S3: creating a liquidity pool completes the ticket and registers the denom.
    #[tokio::test]
    async fn create_pool_registers_denom_and_completes() -> Result<(), HandlerError> {
        let (handlers, store, registry) = set();
        let key = TicketKey::new("cosmos-hub", "HASH2");
        store.create_ticket(&key, "owner").await?;

        let event = tx(
            &[("tx.hash", "HASH2"), ("create_pool.pool_coin_denom", "poolABCDEF")],
            0,
            100,
        );
        handlers.process(Dispatch { chain: "cosmos-hub".into(), raw: event, classified: Event::CreatePoolTx }).await?;

        let ticket = store.get(&key).await?;
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Complete));
        assert!(registry.denoms_of("cosmos-hub").contains(&"poolABCDEF".to_string()));
        Ok(())
    }

    /// S4 + S5: IBC send puts the ticket in transit and registers the
    /// correlation key; a matching receive on the counterparty advances it.
    #[tokio::test]
    async fn ibc_send_then_receive_success() -> Result<(), HandlerError> {
        let store = Arc::new(InMemoryTicketStore::new());
        let registry = Arc::new(
            InMemoryChainRegistry::new(vec![hub_chain()]).with_channel("cosmos-hub", "channel-0", "akash"),
        );
        let handlers = HandlerSet::new(registry.clone(), store.clone(), "cosmos-hub");

        let send_key = TicketKey::new("cosmos-hub", "H_S");
        store.create_ticket(&send_key, "owner").await?;

        let send_event = tx(
            &[
                ("tx.hash", "H_S"),
                ("send_packet.packet_src_port", "transfer"),
                ("send_packet.packet_src_channel", "channel-0"),
                ("send_packet.packet_sequence", "1"),
            ],
            0,
            100,
        );
        handlers
            .process(Dispatch { chain: "cosmos-hub".into(), raw: send_event, classified: Event::IbcSend })
            .await?;

        let ticket = store.get(&send_key).await?;
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Transit));

        let ibc_key = IbcKey::new("akash", "channel-0", "1");
        assert!(store.exists_ibc(&ibc_key).await?);

        let recv_event = tx(
            &[
                ("tx.hash", "H_R"),
                ("recv_packet.packet_src_port", "transfer"),
                ("recv_packet.packet_src_channel", "channel-0"),
                ("recv_packet.packet_sequence", "1"),
                ("write_acknowledgement.packet_ack", r#"{"result":"AQ=="}"#),
            ],
            0,
            200,
        );
        handlers
            .process(Dispatch { chain: "akash".into(), raw: recv_event, classified: Event::IbcRecv })
            .await?;

        let ticket = store.get(&send_key).await?;
        let Some(ticket) = ticket else { return Err(HandlerError::MalformedAck("missing ticket".into())) };
        assert_eq!(ticket.status, TicketStatus::IbcReceiveSuccess);
        assert!(ticket.history.iter().any(|e| e.chain == "akash" && e.tx_hash == "H_R"));
        Ok(())
    }

    /// S6: a timeout on the sending chain unlocks the ticket.
    #[tokio::test]
    async fn ibc_timeout_unlocks() -> Result<(), HandlerError> {
        let store = Arc::new(InMemoryTicketStore::new());
        let registry = Arc::new(
            InMemoryChainRegistry::new(vec![hub_chain()]).with_channel("cosmos-hub", "channel-0", "akash"),
        );
        let handlers = HandlerSet::new(registry.clone(), store.clone(), "cosmos-hub");

        let send_key = TicketKey::new("cosmos-hub", "H_S");
        store.create_ticket(&send_key, "owner").await?;
        let send_event = tx(
            &[
                ("tx.hash", "H_S"),
                ("send_packet.packet_src_port", "transfer"),
                ("send_packet.packet_src_channel", "channel-0"),
                ("send_packet.packet_sequence", "1"),
            ],
            0,
            100,
        );
        handlers
            .process(Dispatch { chain: "cosmos-hub".into(), raw: send_event, classified: Event::IbcSend })
            .await?;

        let timeout_event = tx(
            &[
                ("tx.hash", "H_T"),
                ("timeout_packet.packet_src_channel", "channel-0"),
                ("timeout_packet.packet_sequence", "1"),
            ],
            0,
            300,
        );
        handlers
            .process(Dispatch { chain: "cosmos-hub".into(), raw: timeout_event, classified: Event::IbcTimeout })
            .await?;

        let ticket = store.get(&send_key).await?;
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::TokensUnlockedTimeout));
        Ok(())
    }

    /// An `IbcRecv` for a correlation key this fleet never originated is
    /// silently dropped, not stored.
    #[tokio::test]
    async fn ibc_receive_for_unknown_key_is_dropped() -> Result<(), HandlerError> {
        let (handlers, _store, _registry) = set();
        let recv_event = tx(
            &[
                ("tx.hash", "H_R"),
                ("recv_packet.packet_src_port", "transfer"),
                ("recv_packet.packet_src_channel", "channel-9"),
                ("recv_packet.packet_sequence", "42"),
                ("write_acknowledgement.packet_ack", r#"{"result":"AQ=="}"#),
            ],
            0,
            100,
        );
        // No panic, no error: the key is unknown so this is a silent no-op.
        handlers
            .process(Dispatch { chain: "cosmos-hub".into(), raw: recv_event, classified: Event::IbcRecv })
            .await?;
        Ok(())
    }

    /// `IbcAck` with no `fungible_token_packet.error` attribute is a no-op:
    /// the receive path already recorded success.
    #[tokio::test]
    async fn ibc_ack_without_error_attribute_is_noop() -> Result<(), HandlerError> {
        let store = Arc::new(InMemoryTicketStore::new());
        let registry = Arc::new(
            InMemoryChainRegistry::new(vec![hub_chain()]).with_channel("cosmos-hub", "channel-0", "akash"),
        );
        let handlers = HandlerSet::new(registry.clone(), store.clone(), "cosmos-hub");

        let send_key = TicketKey::new("cosmos-hub", "H_S");
        store.create_ticket(&send_key, "owner").await?;
        let send_event = tx(
            &[
                ("tx.hash", "H_S"),
                ("send_packet.packet_src_port", "transfer"),
                ("send_packet.packet_src_channel", "channel-0"),
                ("send_packet.packet_sequence", "1"),
            ],
            0,
            100,
        );
        handlers
            .process(Dispatch { chain: "cosmos-hub".into(), raw: send_event, classified: Event::IbcSend })
            .await?;

        let ack_event = tx(
            &[
                ("tx.hash", "H_A"),
                ("acknowledge_packet.packet_src_channel", "channel-0"),
                ("acknowledge_packet.packet_sequence", "1"),
            ],
            0,
            400,
        );
        handlers.process(Dispatch { chain: "cosmos-hub".into(), raw: ack_event, classified: Event::IbcAck }).await?;

        let ticket = store.get(&send_key).await?;
        // Still in transit: the ack with no error attribute must not mutate it.
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Transit));
        Ok(())
    }

    /// Idempotence (property 3): applying the same handler twice to the
    /// same event yields the same store state as applying it once.
    #[tokio::test]
    async fn non_ibc_complete_is_idempotent() -> Result<(), HandlerError> {
        let (handlers, store, _registry) = set();
        let key = TicketKey::new("cosmos-hub", "HASH1");
        store.create_ticket(&key, "owner").await?;
        let event = tx(&[("tx.hash", "HASH1")], 0, 100);

        handlers
            .process(Dispatch {
                chain: "cosmos-hub".into(),
                raw: event.clone(),
                classified: Event::NonIbcTx,
            })
            .await?;
        handlers.process(Dispatch { chain: "cosmos-hub".into(), raw: event, classified: Event::NonIbcTx }).await?;

        let ticket = store.get(&key).await?;
        assert_eq!(ticket.map(|t| t.status), Some(TicketStatus::Complete));
        Ok(())
    }

    /// New-block events record `last_block_time` without touching tickets.
    #[tokio::test]
    async fn new_block_records_last_block_time() -> Result<(), HandlerError> {
        let (handlers, store, _registry) = set();
        let event =
            RawEvent { query: "tm.event='NewBlock'".into(), events: HashMap::new(), data: EventData::NewBlock { height: 42, time: OffsetDateTime::UNIX_EPOCH } };
        handlers.process(Dispatch { chain: "cosmos-hub".into(), raw: event, classified: Event::NewBlock }).await?;
        assert!(store.blocks().block(42).await?.is_none());
        Ok(())
    }
}

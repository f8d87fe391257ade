//! In-memory fakes for every external contract (§9.5), shared by the unit
//! tests of the classifier, handlers, watcher and supervisor. None of this
//! is reachable outside `#[cfg(test)]` builds.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::contracts::{
    BlockCache, BlockResultsClient, ChainRegistry, EventSource, EventSourceFactory,
    GrpcClientError, HttpClientError, LiquidityClient, Recv, RegistryError, SourceError,
    StoreError, TicketStore,
};
use crate::entities::{ChainDescriptor, ChannelQuery, IbcKey, Ticket, TicketKey, TicketStatus, TxHashEntry};
use crate::events::{RawEvent, Subscription};

/// A ticket store backed by plain maps behind a mutex. Every setter no-ops
/// when the ticket does not exist, matching §6.3, except
/// `set_failed_with_err` which may create a record regardless.
#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: Mutex<HashMap<TicketKey, Ticket>>,
    ibc_index: Mutex<HashMap<IbcKey, TicketKey>>,
    kv: Mutex<HashMap<String, String>>,
    /// Every `(key, value)` pair ever passed to `set_with_expiry`, in call
    /// order. `kv` alone only exposes the latest value per key, which can't
    /// distinguish "never wrote `false`" from "wrote `false` then
    /// immediately overwrote it" — tests asserting on the liveness-bit
    /// transition sequence (`true` -> `false` -> `resubscribing` -> `true`)
    /// need the full history, not just the current snapshot.
    liveness_log: Mutex<Vec<(String, String)>>,
    pool_fees: Mutex<HashMap<String, (String, String)>>,
    blocks: InMemoryBlockCache,
}

#[derive(Default)]
pub struct InMemoryBlockCache {
    bodies: Mutex<HashMap<i64, Vec<u8>>>,
    last_block: Mutex<Option<(OffsetDateTime, i64)>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_entry(ticket: &mut Ticket, status: TicketStatus, chain: &str, tx_hash: &str) {
        ticket.status = status;
        ticket.history.push(TxHashEntry { chain: chain.to_string(), status, tx_hash: tx_hash.to_string() });
    }

    pub fn kv_get(&self, key: &str) -> Option<String> {
        self.kv.lock().ok().and_then(|m| m.get(key).cloned())
    }

    /// The full sequence of values ever written to `key` via
    /// `set_with_expiry`, in call order.
    pub fn liveness_log(&self, key: &str) -> Vec<String> {
        self.liveness_log
            .lock()
            .ok()
            .map(|log| log.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pool_fee(&self, pool_id: &str) -> Option<(String, String)> {
        self.pool_fees.lock().ok().and_then(|m| m.get(pool_id).cloned())
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn create_ticket(&self, key: &TicketKey, _owner: &str) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        tickets.entry(key.clone()).or_insert(Ticket { status: TicketStatus::Pending, history: Vec::new() });
        Ok(())
    }

    async fn exists(&self, key: &TicketKey) -> Result<bool, StoreError> {
        let tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        Ok(tickets.contains_key(key))
    }

    async fn exists_ibc(&self, key: &IbcKey) -> Result<bool, StoreError> {
        let index = self.ibc_index.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        Ok(index.contains_key(key))
    }

    async fn get(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError> {
        let tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        Ok(tickets.get(key).cloned())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), StoreError> {
        let mut kv = self.kv.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        kv.insert(key.to_string(), value.to_string());
        drop(kv);
        let mut log = self.liveness_log.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        log.push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn set_complete(&self, key: &TicketKey, _height: i64) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        if let Some(ticket) = tickets.get_mut(key) {
            ticket.status = TicketStatus::Complete;
        }
        Ok(())
    }

    async fn set_failed_with_err(&self, key: &TicketKey, _log: &str, _height: i64) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        let ticket = tickets.entry(key.clone()).or_insert(Ticket { status: TicketStatus::Pending, history: Vec::new() });
        Self::push_entry(ticket, TicketStatus::Failed, &key.chain_name, &key.tx_hash);
        Ok(())
    }

    async fn set_in_transit(
        &self,
        local_key: &TicketKey,
        counterparty: &str,
        channel: &str,
        sequence: &str,
        _tx_hash: &str,
        _chain: &str,
        _height: i64,
    ) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        let Some(ticket) = tickets.get_mut(local_key) else { return Ok(()) };
        ticket.status = TicketStatus::Transit;
        drop(tickets);

        let mut index = self.ibc_index.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        index.insert(IbcKey::new(counterparty, channel, sequence), local_key.clone());
        Ok(())
    }

    async fn set_ibc_received(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::IbcReceiveSuccess, chain, tx_hash)
    }

    async fn set_ibc_failed(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::IbcReceiveFailed, chain, tx_hash)
    }

    async fn set_ibc_ack_unlock(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::TokensUnlockedAck, chain, tx_hash)
    }

    async fn set_ibc_timeout_unlock(&self, key: &IbcKey, tx_hash: &str, chain: &str, _height: i64) -> Result<(), StoreError> {
        self.advance_ibc(key, TicketStatus::TokensUnlockedTimeout, chain, tx_hash)
    }

    async fn set_pool_swap_fees(&self, pool_id: &str, fee_amount: &str, fee_denom: &str) -> Result<(), StoreError> {
        let mut fees = self.pool_fees.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        fees.insert(pool_id.to_string(), (fee_amount.to_string(), fee_denom.to_string()));
        Ok(())
    }

    fn blocks(&self) -> &dyn BlockCache {
        &self.blocks
    }
}

impl InMemoryTicketStore {
    fn advance_ibc(&self, key: &IbcKey, status: TicketStatus, chain: &str, tx_hash: &str) -> Result<(), StoreError> {
        let index = self.ibc_index.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        let Some(local_key) = index.get(key).cloned() else { return Ok(()) };
        drop(index);

        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        if let Some(ticket) = tickets.get_mut(&local_key) {
            Self::push_entry(ticket, status, chain, tx_hash);
        }
        Ok(())
    }
}

#[async_trait]
impl BlockCache for InMemoryBlockCache {
    async fn add(&self, body: &[u8], height: i64) -> Result<(), StoreError> {
        let mut bodies = self.bodies.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        bodies.insert(height, body.to_vec());
        Ok(())
    }

    async fn block(&self, height: i64) -> Result<Option<Vec<u8>>, StoreError> {
        let bodies = self.bodies.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        Ok(bodies.get(&height).cloned())
    }

    async fn set_last_block_time(&self, time: OffsetDateTime, height: i64) -> Result<(), StoreError> {
        let mut last = self.last_block.lock().map_err(|_| StoreError::Backend("poisoned".into()))?;
        *last = Some((time, height));
        Ok(())
    }
}

/// A registry backed by a fixed chain table and `(chain, channel) ->
/// counterparty` map, mutable only through `update_denoms`.
#[derive(Default)]
pub struct InMemoryChainRegistry {
    chains: Mutex<HashMap<String, ChainDescriptor>>,
    counterparties: HashMap<(String, String), Vec<ChannelQuery>>,
}

impl InMemoryChainRegistry {
    pub fn new(chains: Vec<ChainDescriptor>) -> Self {
        Self {
            chains: Mutex::new(chains.into_iter().map(|c| (c.name.clone(), c)).collect()),
            counterparties: HashMap::new(),
        }
    }

    pub fn with_channel(mut self, chain: &str, channel: &str, counterparty: &str) -> Self {
        self.counterparties.insert(
            (chain.to_string(), channel.to_string()),
            vec![ChannelQuery {
                chain_name: chain.to_string(),
                counterparty: counterparty.to_string(),
                channel_name: channel.to_string(),
            }],
        );
        self
    }

    pub fn denoms_of(&self, chain: &str) -> Vec<String> {
        self.chains
            .lock()
            .ok()
            .and_then(|m| m.get(chain).map(|c| c.denoms.iter().map(|d| d.name.clone()).collect()))
            .unwrap_or_default()
    }

    /// Replaces the whole chain table, simulating the registry changing
    /// between two supervisor reconciliation ticks.
    pub fn set_chains(&self, chains: Vec<ChainDescriptor>) {
        if let Ok(mut map) = self.chains.lock() {
            *map = chains.into_iter().map(|c| (c.name.clone(), c)).collect();
        }
    }
}

#[async_trait]
impl ChainRegistry for InMemoryChainRegistry {
    async fn chains(&self) -> Result<Vec<ChainDescriptor>, RegistryError> {
        let chains = self.chains.lock().map_err(|_| RegistryError::Unavailable("poisoned".into()))?;
        Ok(chains.values().cloned().collect())
    }

    async fn chain(&self, name: &str) -> Result<ChainDescriptor, RegistryError> {
        let chains = self.chains.lock().map_err(|_| RegistryError::Unavailable("poisoned".into()))?;
        chains.get(name).cloned().ok_or_else(|| RegistryError::ChainNotFound(name.to_string()))
    }

    async fn get_counterparty(&self, chain: &str, src_channel: &str) -> Result<Vec<ChannelQuery>, RegistryError> {
        Ok(self.counterparties.get(&(chain.to_string(), src_channel.to_string())).cloned().unwrap_or_default())
    }

    async fn update_denoms(&self, chain: &ChainDescriptor) -> Result<(), RegistryError> {
        let mut chains = self.chains.lock().map_err(|_| RegistryError::Unavailable("poisoned".into()))?;
        chains.insert(chain.name.clone(), chain.clone());
        Ok(())
    }
}

/// An event source that replays a fixed script of events, then blocks
/// (simulating an idle node) until cancelled from outside `recv`.
pub struct ScriptedEventSource {
    script: Mutex<Vec<RawEvent>>,
    subscriptions: Mutex<Vec<Subscription>>,
    read_wait: Duration,
}

impl ScriptedEventSource {
    pub fn new(script: Vec<RawEvent>, read_wait: Duration) -> Self {
        Self { script: Mutex::new(script), subscriptions: Mutex::new(Vec::new()), read_wait }
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn subscribe(&mut self, subscription: Subscription) -> Result<(), SourceError> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.push(subscription);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Recv {
        loop {
            let next = self.script.lock().ok().and_then(|mut s| (!s.is_empty()).then(|| s.remove(0)));
            match next {
                Some(event) => return Recv::Event(event),
                None => tokio::time::sleep(self.read_wait).await,
            }
        }
    }

    async fn close(&mut self) {}
}

/// Builds a fresh [`ScriptedEventSource`] replaying the same script every
/// time `connect` is called, so resubscription tests can assert on
/// post-reconnect delivery.
pub struct ScriptedEventSourceFactory {
    script: Vec<RawEvent>,
}

impl ScriptedEventSourceFactory {
    pub fn new(script: Vec<RawEvent>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl EventSourceFactory for ScriptedEventSourceFactory {
    async fn connect(&self, _endpoint: &str, read_wait: Duration) -> Result<Box<dyn EventSource>, SourceError> {
        Ok(Box::new(ScriptedEventSource::new(self.script.clone(), read_wait)))
    }
}

/// A factory whose every `connect` call fails with a fixed error, for
/// exercising transient-vs-fatal connect handling without a real transport.
pub struct FailingEventSourceFactory {
    make_error: Box<dyn Fn() -> SourceError + Send + Sync>,
}

impl FailingEventSourceFactory {
    pub fn new(make_error: impl Fn() -> SourceError + Send + Sync + 'static) -> Self {
        Self { make_error: Box::new(make_error) }
    }
}

#[async_trait]
impl EventSourceFactory for FailingEventSourceFactory {
    async fn connect(&self, _endpoint: &str, _read_wait: Duration) -> Result<Box<dyn EventSource>, SourceError> {
        Err((self.make_error)())
    }
}

#[derive(Default)]
pub struct StubBlockResultsClient {
    pub body: Vec<u8>,
}

#[async_trait]
impl BlockResultsClient for StubBlockResultsClient {
    async fn block_results(&self, _rpc_endpoint: &str, _height: i64) -> Result<Vec<u8>, HttpClientError> {
        Ok(self.body.clone())
    }
}

#[derive(Default)]
pub struct StubLiquidityClient;

#[async_trait]
impl LiquidityClient for StubLiquidityClient {
    async fn liquidity_pools(&self, _grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError> {
        Ok(serde_json::json!({"pools": []}))
    }

    async fn liquidity_params(&self, _grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError> {
        Ok(serde_json::json!({"params": {}}))
    }

    async fn total_supply(&self, _grpc_addr: &str) -> Result<serde_json::Value, GrpcClientError> {
        Ok(serde_json::json!({"supply": []}))
    }
}

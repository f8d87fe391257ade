//! Tendermint WebSocket-backed [`EventSource`]/[`EventSourceFactory`],
//! grounded in hermes's `event_source::websocket` module: build a client and
//! its driver, spawn the driver, subscribe per query, and merge the
//! subscriptions into one stream with `select_all`. Reconnection here is
//! "construct a fresh `EventSource`", matching the watcher's own
//! resubscription-owns-the-value pattern (§4.D) rather than the teacher's
//! in-place `try_reconnect`/`mem::swap` dance — there is exactly one caller
//! of `connect`, so there is nothing to swap into.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{select_all, SelectAll};
use futures_util::StreamExt;
use tendermint_rpc::event::{Event as RpcEvent, EventData as RpcEventData};
use tendermint_rpc::query::Query;
use tendermint_rpc::{Error as RpcError, Subscription, SubscriptionClient, WebSocketClient};
use time::OffsetDateTime;
use tracing::{debug, warn};

use rpcwatcher_core::contracts::{EventSource, EventSourceFactory, Recv, SourceError};
use rpcwatcher_core::events::{EventData, RawEvent, Subscription as CoreSubscription};

pub struct TendermintEventSourceFactory;

#[async_trait]
impl EventSourceFactory for TendermintEventSourceFactory {
    async fn connect(
        &self,
        endpoint: &str,
        read_wait: std::time::Duration,
    ) -> Result<Box<dyn EventSource>, SourceError> {
        let ws_url = to_ws_url(endpoint);

        let (client, driver) = WebSocketClient::builder(ws_url.parse().map_err(|_| {
            SourceError::Transport(format!("invalid websocket endpoint: {endpoint}"))
        })?)
        .build()
        .await
        .map_err(classify_connect_error(endpoint))?;

        let driver_handle = tokio::spawn(async move {
            if let Err(e) = driver.run().await {
                warn!(error = %e, "websocket driver exited with error");
            }
        });

        Ok(Box::new(TendermintEventSource {
            endpoint: endpoint.to_string(),
            client,
            driver_handle,
            subscriptions: select_all(Vec::<Subscription>::new()),
            read_wait,
        }))
    }
}

type MergedSubscriptions = SelectAll<Subscription>;

struct TendermintEventSource {
    endpoint: String,
    client: WebSocketClient,
    driver_handle: tokio::task::JoinHandle<()>,
    subscriptions: MergedSubscriptions,
    read_wait: std::time::Duration,
}

#[async_trait]
impl EventSource for TendermintEventSource {
    async fn subscribe(&mut self, subscription: CoreSubscription) -> Result<(), SourceError> {
        let query: Query = subscription.query().parse().map_err(|e| SourceError::Subscribe {
            query: subscription.query().to_string(),
            reason: format!("{e}"),
        })?;

        let stream = self.client.subscribe(query.clone()).await.map_err(|e| SourceError::Subscribe {
            query: subscription.query().to_string(),
            reason: e.to_string(),
        })?;

        self.subscriptions.push(stream);

        debug!(endpoint = %self.endpoint, query = subscription.query(), "subscribed");
        Ok(())
    }

    async fn recv(&mut self) -> Recv {
        loop {
            match tokio::time::timeout(self.read_wait, self.subscriptions.next()).await {
                Ok(Some(Ok(event))) => match translate_event(event) {
                    Some(raw) => return Recv::Event(raw),
                    None => continue,
                },
                Ok(Some(Err(e))) => return Recv::Error(SourceError::Transport(e.to_string())),
                Ok(None) => return Recv::Error(SourceError::Closed),
                Err(_) => {
                    debug!(endpoint = %self.endpoint, "no message within read_wait, still waiting");
                    continue;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.close() {
            warn!(endpoint = %self.endpoint, error = %e, "error closing websocket client");
        }
        let handle = std::mem::replace(&mut self.driver_handle, tokio::spawn(async {}));
        let _ = handle.await;
    }
}

/// `connect` receives the watcher's endpoint with the `/websocket` path
/// already appended (see `Watcher::construct`); only the scheme needs
/// rewriting here.
fn to_ws_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        format!("ws://{endpoint}")
    }
}

fn classify_connect_error(endpoint: &str) -> impl FnOnce(RpcError) -> SourceError + '_ {
    move |e: RpcError| {
        let message = e.to_string();
        if message.contains("dns") || message.contains("resolve") || message.contains("lookup") {
            SourceError::DnsNotResolved { endpoint: endpoint.to_string() }
        } else if message.contains("refused") {
            SourceError::ConnectionRefused { endpoint: endpoint.to_string() }
        } else {
            SourceError::Transport(message)
        }
    }
}

/// Converts a raw Tendermint RPC event into the core's transport-neutral
/// [`RawEvent`]. Returns `None` for event shapes the classifier never needs
/// (anything that isn't `Tx` or a `NewBlock` carrying an actual block), so
/// `recv` can just loop and wait for the next one.
fn translate_event(event: RpcEvent) -> Option<RawEvent> {
    let events = event.events.unwrap_or_default();
    let query = event.query.clone();

    let data = match &event.data {
        RpcEventData::Tx { tx_result } => EventData::Tx {
            height: tx_result.height,
            code: tx_result.result.code.value(),
            log: tx_result.result.log.to_string(),
        },
        RpcEventData::NewBlock { block: Some(block), .. } => EventData::NewBlock {
            height: block.header.height.value() as i64,
            time: OffsetDateTime::from_unix_timestamp(block.header.time.unix_timestamp())
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        },
        _ => return None,
    };

    Some(RawEvent { query, events, data })
}

//! The WebSocket event source contract: connect, subscribe, receive.

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{RawEvent, Subscription};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("dns resolution failed for {endpoint}")]
    DnsNotResolved { endpoint: String },
    #[error("connection refused: {endpoint}")]
    ConnectionRefused { endpoint: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("subscription failed for {query}: {reason}")]
    Subscribe { query: String, reason: String },
    #[error("source closed")]
    Closed,
}

impl SourceError {
    /// Whether a connection attempt for a not-yet-reachable chain should be
    /// treated as transient (DNS failure or connection refused).
    pub fn is_transient_connect_error(&self) -> bool {
        matches!(self, SourceError::DnsNotResolved { .. } | SourceError::ConnectionRefused { .. })
    }
}

/// One inbound message, or the reason the read loop should stop reading.
pub enum Recv {
    Event(RawEvent),
    Error(SourceError),
}

/// A live connection to a single node's event stream. Implementations own the
/// underlying transport (a Tendermint WebSocket client in production, an
/// in-memory script in tests).
#[async_trait]
pub trait EventSource: Send {
    async fn subscribe(&mut self, subscription: Subscription) -> Result<(), SourceError>;

    /// Waits for the next message. Implementations poll internally against
    /// the `read_wait` given to `connect`; elapsing it with nothing to
    /// report is not itself a signal of trouble, so `recv` keeps waiting
    /// rather than returning early. Callers that need an overall ceiling on
    /// one `recv` call wrap it in their own timeout.
    async fn recv(&mut self) -> Recv;

    async fn close(&mut self);
}

/// Builds a fresh [`EventSource`] connected to a node's websocket endpoint.
/// Kept separate from `EventSource` so the watcher can reconnect without
/// holding on to a dead transport. `read_wait` is the deadline each internal
/// poll of the underlying transport is allowed before it is retried.
#[async_trait]
pub trait EventSourceFactory: Send + Sync {
    async fn connect(&self, endpoint: &str, read_wait: std::time::Duration) -> Result<Box<dyn EventSource>, SourceError>;
}

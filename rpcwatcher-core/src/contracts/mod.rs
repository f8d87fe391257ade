//! External contracts the core consumes (§4.A). Every production backend
//! (real WebSocket client, registry database, Redis-like store, HTTP/gRPC
//! clients) lives outside this crate and is wired in by `rpcwatcher-server`;
//! these traits are the seam.

pub mod event_source;
pub mod grpc_client;
pub mod http_client;
pub mod registry;
pub mod ticket_store;

pub use event_source::{EventSource, EventSourceFactory, Recv, SourceError};
pub use grpc_client::{GrpcClientError, LiquidityClient};
pub use http_client::{BlockResultsClient, HttpClientError};
pub use registry::{ChainRegistry, RegistryError};
pub use ticket_store::{BlockCache, StoreError, TicketStore};

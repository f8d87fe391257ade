//! Domain types shared by the classifier, handlers, watcher and supervisor.

use std::fmt;

/// A chain as known to the registry, refreshed by the supervisor every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub name: String,
    pub enabled: bool,
    pub node_rpc_url: String,
    pub node_grpc_addr: String,
    /// counterparty chain name -> channel id, for channels this chain owns.
    pub primary_channels: std::collections::HashMap<String, String>,
    pub denoms: Vec<Denom>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denom {
    pub name: String,
    pub display_name: String,
    pub precision: u32,
    pub is_pool_coin: bool,
    pub is_ibc_token: bool,
}

/// A counterparty resolved for a `(chain, src_channel)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelQuery {
    pub chain_name: String,
    pub counterparty: String,
    pub channel_name: String,
}

/// Local key for a transaction observed directly on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketKey {
    pub chain_name: String,
    pub tx_hash: String,
}

impl TicketKey {
    pub fn new(chain_name: impl Into<String>, tx_hash: impl Into<String>) -> Self {
        Self { chain_name: chain_name.into(), tx_hash: tx_hash.into() }
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_name, self.tx_hash)
    }
}

/// Cross-chain correlation key assigned at IBC send time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IbcKey {
    pub counterparty_chain: String,
    pub src_channel: String,
    pub sequence: String,
}

impl IbcKey {
    pub fn new(
        counterparty_chain: impl Into<String>,
        src_channel: impl Into<String>,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            counterparty_chain: counterparty_chain.into(),
            src_channel: src_channel.into(),
            sequence: sequence.into(),
        }
    }
}

impl fmt::Display for IbcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ibc:{}:{}:{}", self.counterparty_chain, self.src_channel, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Pending,
    Transit,
    Complete,
    Failed,
    IbcReceiveSuccess,
    IbcReceiveFailed,
    TokensUnlockedAck,
    TokensUnlockedTimeout,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Transit => "transit",
            TicketStatus::Complete => "complete",
            TicketStatus::Failed => "failed",
            TicketStatus::IbcReceiveSuccess => "IBC_receive_success",
            TicketStatus::IbcReceiveFailed => "IBC_receive_failed",
            TicketStatus::TokensUnlockedAck => "Tokens_unlocked_ack",
            TicketStatus::TokensUnlockedTimeout => "Tokens_unlocked_timeout",
        };
        f.write_str(s)
    }
}

/// One phase recorded against a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHashEntry {
    pub chain: String,
    pub status: TicketStatus,
    pub tx_hash: String,
}

/// A ticket as returned by `TicketStore::get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub status: TicketStatus,
    pub history: Vec<TxHashEntry>,
}

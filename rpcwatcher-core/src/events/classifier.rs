//! Pure, synchronous classification of a [`RawEvent`] into a tagged [`Event`].
//!
//! Precedence: `FailedTx` overrides everything. Beyond that, markers are
//! expected to be mutually exclusive by construction of the upstream chain;
//! when more than one is present, the most specific wins in the order
//! `CreatePool > Swap > IbcSend > IbcRecv > IbcTimeout > IbcAck > NonIbc`.

use super::raw::{EventData, RawEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    NonIbcTx,
    FailedTx,
    CreatePoolTx,
    SwapTx,
    IbcSend,
    IbcRecv,
    IbcAck,
    IbcTimeout,
    NewBlock,
    Ignore,
}

pub fn classify(event: &RawEvent) -> Event {
    if let EventData::NewBlock { .. } = event.data {
        return Event::NewBlock;
    }

    let code = match &event.data {
        EventData::Tx { code, .. } => *code,
        _ => return Event::Ignore,
    };

    if event.first("tx.hash").is_none() {
        return Event::Ignore;
    }

    if code != 0 {
        return Event::FailedTx;
    }

    if event.has("create_pool.pool_name") {
        return Event::CreatePoolTx;
    }
    if event.has("swap_within_batch.pool_id") {
        return Event::SwapTx;
    }
    if event.has("ibc_transfer.sender") {
        return Event::IbcSend;
    }
    if event.has("recv_packet.packet_sequence") {
        return Event::IbcRecv;
    }
    if event.has("timeout.refund_receiver") {
        return Event::IbcTimeout;
    }
    if event.has("fungible_token_packet.acknowledgement") {
        return Event::IbcAck;
    }

    Event::NonIbcTx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tx_event(markers: &[(&str, &str)], code: u32) -> RawEvent {
        let mut events: HashMap<String, Vec<String>> = HashMap::new();
        events.insert("tx.hash".into(), vec!["HASH1".into()]);
        for (k, v) in markers {
            events.insert((*k).into(), vec![(*v).into()]);
        }
        RawEvent { query: "tm.event='Tx'".into(), events, data: EventData::Tx { height: 1, code, log: String::new() } }
    }

    #[test]
    fn plain_transfer_is_non_ibc() {
        assert_eq!(classify(&tx_event(&[], 0)), Event::NonIbcTx);
    }

    #[test]
    fn nonzero_code_overrides_everything() {
        let e = tx_event(&[("create_pool.pool_name", "x")], 19);
        assert_eq!(classify(&e), Event::FailedTx);
    }

    #[test]
    fn missing_tx_hash_is_ignored() {
        let mut e = tx_event(&[], 0);
        e.events.remove("tx.hash");
        assert_eq!(classify(&e), Event::Ignore);
    }

    #[test]
    fn create_pool_wins_over_swap() {
        let e = tx_event(
            &[("create_pool.pool_name", "x"), ("swap_within_batch.pool_id", "1")],
            0,
        );
        assert_eq!(classify(&e), Event::CreatePoolTx);
    }

    #[test]
    fn ibc_send_marker() {
        let e = tx_event(&[("ibc_transfer.sender", "cosmos1abc")], 0);
        assert_eq!(classify(&e), Event::IbcSend);
    }

    #[test]
    fn new_block_classifies_regardless_of_attributes() {
        let e = RawEvent {
            query: "tm.event='NewBlock'".into(),
            events: HashMap::new(),
            data: EventData::NewBlock { height: 10, time: time::OffsetDateTime::UNIX_EPOCH },
        };
        assert_eq!(classify(&e), Event::NewBlock);
    }
}

//! Recognition rules for liquidity-pool share tokens and IBC-wrapped denoms.

const MIN_LEN: usize = 4;

/// A pool coin denom carries the `pool` prefix and is at least four characters long.
pub fn is_pool_coin(denom: &str) -> bool {
    denom.len() >= MIN_LEN && denom.starts_with("pool")
}

/// An IBC denom carries the `ibc/` prefix and is at least four characters long.
pub fn is_ibc_token(denom: &str) -> bool {
    denom.len() >= MIN_LEN && denom.starts_with("ibc/")
}

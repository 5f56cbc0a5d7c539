//! Protocol and service constants. All monetary values are in base units
//! (1 coin = 10^8 base units).

pub const COIN: u64 = 100_000_000;

/// Upper bound on the total value that can exist in the UTXO set.
///
/// A digest pass whose running total exceeds this is reporting a corrupt
/// ledger, not a large one.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Default TCP port for the JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 18432;

/// Confirmations required by `waitforlogs` when the caller gives none.
pub const DEFAULT_WAIT_MINCONF: u64 = 6;

/// Confirmations required by `searchlogs` when the caller gives none.
pub const DEFAULT_SEARCH_MINCONF: u64 = 0;

/// Upper bound on how long a log waiter sleeps before re-checking the index
/// and its caller, in milliseconds.
pub const WAIT_POLL_INTERVAL_MS: u64 = 1_000;

/// Length of a contract address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Check whether an amount is within the valid monetary range.
pub fn money_range(value: u64) -> bool {
    value <= MAX_MONEY
}

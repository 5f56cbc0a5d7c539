//! Trait interfaces between Strata and its collaborators.
//!
//! - [`ChainSelector`]: best-tip choice (the consensus engine, or
//!   [`MostWorkSelector`](crate::selection::MostWorkSelector))
//! - [`UtxoSnapshot`]: consistent read view of the UTXO set
//! - [`LogIndexStore`]: backing store of the `(height, address)` log index
//! - [`ReceiptStore`]: per-transaction execution receipts

use std::collections::BTreeMap;

use crate::block_index::{BlockIndex, NodeId};
use crate::error::{DigestError, StrataError};
use crate::types::{Address, Coin, Hash256, HeightIndexEntry, OutPoint, Receipt};

/// Chooses the block that should be the active tip.
pub trait ChainSelector: Send + Sync {
    /// Best valid candidate, or `None` if no block qualifies.
    fn select_best(&self, index: &BlockIndex) -> Option<NodeId>;
}

/// Ordered stream of unspent outputs.
pub type CoinCursor<'a> = Box<dyn Iterator<Item = Result<(OutPoint, Coin), DigestError>> + 'a>;

/// A point-in-time view of the UTXO set.
///
/// The cursor must yield outputs in ascending `(txid, index)` order and must
/// reflect exactly the state at [`best_block`](Self::best_block).
pub trait UtxoSnapshot {
    /// Hash of the block the snapshot was taken at.
    fn best_block(&self) -> Hash256;

    /// Iterate all unspent outputs in key order.
    fn cursor(&self) -> CoinCursor<'_>;

    /// Estimated on-disk size of the set in bytes.
    fn estimate_size(&self) -> u64;
}

/// Backing store for the `(height, address) -> tx hashes` log index.
///
/// Keys are height-major so a whole height can be retracted without a scan
/// of the rest of the index.
pub trait LogIndexStore: Send + Sync {
    /// Replace every entry at `height` with `entries`.
    fn write_height(
        &self,
        height: u64,
        entries: &BTreeMap<Address, Vec<Hash256>>,
    ) -> Result<(), StrataError>;

    /// Remove every entry at `height`.
    fn erase_height(&self, height: u64) -> Result<(), StrataError>;

    /// Entries with `from <= height <= to` (unbounded above when `to` is
    /// `None`), ordered by `(height, address)`.
    fn scan_range(&self, from: u64, to: Option<u64>) -> Result<Vec<HeightIndexEntry>, StrataError>;

    /// Highest height holding any entry.
    fn highest_height(&self) -> Result<Option<u64>, StrataError>;

    /// Drop the whole index.
    fn wipe(&self) -> Result<(), StrataError>;
}

/// Execution receipts keyed by transaction hash.
pub trait ReceiptStore: Send + Sync {
    /// Store receipts, replacing any previous receipts of the same
    /// transactions.
    fn put_receipts(&self, receipts: &[Receipt]) -> Result<(), StrataError>;

    /// Receipts of one transaction; empty if none are known.
    fn receipts_for(&self, tx_hash: &Hash256) -> Result<Vec<Receipt>, StrataError>;
}

//! In-memory UTXO set.
//!
//! [`MemoryUtxoSet`] keeps coins in a `BTreeMap` keyed by [`OutPoint`], so
//! iteration is already in the `(txid, index)` order the digest needs. It is
//! the reference snapshot for tests; the node reads a RocksDB snapshot
//! instead.

use std::collections::BTreeMap;

use crate::traits::{CoinCursor, UtxoSnapshot};
use crate::types::{Coin, Hash256, OutPoint};

/// Fixed per-entry overhead used by [`MemoryUtxoSet::estimate_size`]:
/// 32-byte txid, 4-byte index, value, height and coinbase flag.
const ENTRY_OVERHEAD: u64 = 32 + 4 + 8 + 8 + 1;

/// UTXO set held entirely in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryUtxoSet {
    coins: BTreeMap<OutPoint, Coin>,
    best_block: Hash256,
}

impl MemoryUtxoSet {
    pub fn new(best_block: Hash256) -> Self {
        Self {
            coins: BTreeMap::new(),
            best_block,
        }
    }

    /// Add (or overwrite) one unspent output.
    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    /// Add every output of a transaction, indexed from zero.
    pub fn add_outputs(
        &mut self,
        txid: Hash256,
        outputs: impl IntoIterator<Item = (Vec<u8>, u64)>,
        height: u64,
        is_coinbase: bool,
    ) {
        for (index, (script, value)) in outputs.into_iter().enumerate() {
            self.coins.insert(
                OutPoint::new(txid, index as u32),
                Coin {
                    script,
                    value,
                    height,
                    is_coinbase,
                },
            );
        }
    }

    /// Remove an output, returning it if it was unspent.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best_block = hash;
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl FromIterator<(OutPoint, Coin)> for MemoryUtxoSet {
    fn from_iter<I: IntoIterator<Item = (OutPoint, Coin)>>(iter: I) -> Self {
        Self {
            coins: iter.into_iter().collect(),
            best_block: Hash256::ZERO,
        }
    }
}

impl UtxoSnapshot for MemoryUtxoSet {
    fn best_block(&self) -> Hash256 {
        self.best_block
    }

    fn cursor(&self) -> CoinCursor<'_> {
        Box::new(self.coins.iter().map(|(op, coin)| Ok((*op, coin.clone()))))
    }

    fn estimate_size(&self) -> u64 {
        self.coins
            .values()
            .map(|c| ENTRY_OVERHEAD + c.script.len() as u64)
            .sum()
    }
}

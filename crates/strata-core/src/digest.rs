//! Canonical digest of the UTXO set.
//!
//! One forward pass over a [`UtxoSnapshot`] in `(txid, index)` order.
//! Outputs of the same transaction are grouped and serialized as
//!
//! ```text
//! txid || VARINT(2*height + coinbase)
//!      || { VARINT(index+1) || script || VARINT(value) }*
//!      || VARINT(0)
//! ```
//!
//! after the snapshot's best-block hash. The stream is hashed with double
//! SHA-256. Two nodes holding the same coins at the same block produce the
//! same digest whatever their storage layout.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::block_index::BlockIndex;
use crate::constants::MAX_MONEY;
use crate::error::DigestError;
use crate::traits::UtxoSnapshot;
use crate::types::{Coin, Hash256};

/// Statistics and digest of one UTXO set snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoDigestResult {
    pub height: u64,
    pub best_block: Hash256,
    /// Distinct transactions with at least one unspent output.
    pub transactions: u64,
    pub outputs: u64,
    pub total_amount: u64,
    /// Collaborator estimate of the set's on-disk size.
    pub disk_size: u64,
    pub digest: Hash256,
}

/// Streaming double-SHA-256 writer with the node's integer encodings.
#[derive(Clone, Default)]
pub struct HashWriter {
    inner: Sha256,
}

impl HashWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn write_hash(&mut self, hash: &Hash256) {
        self.inner.update(hash.as_bytes());
    }

    /// MSB base-128 varint where each continuation byte carries an implicit
    /// +1, so every value has exactly one encoding.
    pub fn write_varint(&mut self, mut n: u64) {
        let mut tmp = [0u8; 10];
        let mut len = 0usize;
        loop {
            tmp[len] = (n & 0x7F) as u8 | if len > 0 { 0x80 } else { 0x00 };
            if n <= 0x7F {
                break;
            }
            n = (n >> 7) - 1;
            len += 1;
        }
        let mut out = [0u8; 10];
        for (i, b) in tmp[..=len].iter().rev().enumerate() {
            out[i] = *b;
        }
        self.inner.update(&out[..=len]);
    }

    /// Length prefix: 1, 3, 5 or 9 bytes, little-endian payload.
    pub fn write_compact_size(&mut self, n: u64) {
        if n < 253 {
            self.inner.update([n as u8]);
        } else if n <= 0xFFFF {
            self.inner.update([253u8]);
            self.inner.update((n as u16).to_le_bytes());
        } else if n <= 0xFFFF_FFFF {
            self.inner.update([254u8]);
            self.inner.update((n as u32).to_le_bytes());
        } else {
            self.inner.update([255u8]);
            self.inner.update(n.to_le_bytes());
        }
    }

    /// Length-prefixed byte vector.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_compact_size(bytes.len() as u64);
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> Hash256 {
        let first = self.inner.finalize();
        Hash256(Sha256::digest(first).into())
    }
}

/// Computes [`UtxoDigestResult`]s with a configurable supply bound.
#[derive(Debug, Clone, Copy)]
pub struct DigestEngine {
    supply_bound: u64,
}

impl Default for DigestEngine {
    fn default() -> Self {
        Self {
            supply_bound: MAX_MONEY,
        }
    }
}

impl DigestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supply_bound(supply_bound: u64) -> Self {
        Self { supply_bound }
    }

    /// Digest a snapshot whose best block sits at `height`.
    ///
    /// # Errors
    ///
    /// - [`DigestError::Io`] if the cursor fails mid-stream
    /// - [`DigestError::AmountOverflow`] if the running total exceeds the
    ///   supply bound
    pub fn compute<S: UtxoSnapshot + ?Sized>(
        &self,
        snapshot: &S,
        height: u64,
    ) -> Result<UtxoDigestResult, DigestError> {
        let best_block = snapshot.best_block();
        let mut acc = Accumulator {
            writer: HashWriter::new(),
            transactions: 0,
            outputs: 0,
            total: 0,
            bound: self.supply_bound,
        };
        acc.writer.write_hash(&best_block);

        let mut group_txid = Hash256::ZERO;
        let mut group: Vec<(u32, Coin)> = Vec::new();
        for item in snapshot.cursor() {
            let (outpoint, coin) = item.inspect_err(|e| warn!("UTXO digest aborted: {e}"))?;
            if !group.is_empty() && outpoint.txid != group_txid {
                acc.apply(&group_txid, &group)?;
                group.clear();
            }
            group_txid = outpoint.txid;
            group.push((outpoint.index, coin));
        }
        if !group.is_empty() {
            acc.apply(&group_txid, &group)?;
        }

        let result = UtxoDigestResult {
            height,
            best_block,
            transactions: acc.transactions,
            outputs: acc.outputs,
            total_amount: acc.total,
            disk_size: snapshot.estimate_size(),
            digest: acc.writer.finalize(),
        };
        debug!(
            height,
            transactions = result.transactions,
            outputs = result.outputs,
            digest = %result.digest,
            "UTXO set digest computed"
        );
        Ok(result)
    }
}

struct Accumulator {
    writer: HashWriter,
    transactions: u64,
    outputs: u64,
    total: u64,
    bound: u64,
}

impl Accumulator {
    /// Serialize one transaction's outputs. All outputs of a transaction
    /// share height and coinbase flag, so the first one speaks for the group.
    fn apply(&mut self, txid: &Hash256, outputs: &[(u32, Coin)]) -> Result<(), DigestError> {
        let Some((_, first)) = outputs.first() else {
            return Ok(());
        };
        self.writer.write_hash(txid);
        self.writer
            .write_varint((first.height << 1) | u64::from(first.is_coinbase));
        self.transactions += 1;
        for (index, coin) in outputs {
            self.writer.write_varint(u64::from(*index) + 1);
            self.writer.write_var_bytes(&coin.script);
            self.writer.write_varint(coin.value);
            self.outputs += 1;
            self.total = self
                .total
                .checked_add(coin.value)
                .filter(|t| *t <= self.bound)
                .ok_or(DigestError::AmountOverflow {
                    total: u128::from(self.total) + u128::from(coin.value),
                    bound: self.bound,
                })?;
        }
        self.writer.write_varint(0);
        Ok(())
    }
}

/// Digest a snapshot with the default engine, resolving its height through
/// the block index.
///
/// # Errors
///
/// [`DigestError::UnknownBestBlock`] if the snapshot's best block is not in
/// `index`, plus everything [`DigestEngine::compute`] returns.
pub fn compute_digest<S: UtxoSnapshot + ?Sized>(
    snapshot: &S,
    index: &BlockIndex,
) -> Result<UtxoDigestResult, DigestError> {
    let best = snapshot.best_block();
    let height = index
        .get(&best)
        .map(|n| n.height)
        .ok_or_else(|| DigestError::UnknownBestBlock(best.to_string()))?;
    DigestEngine::new().compute(snapshot, height)
}

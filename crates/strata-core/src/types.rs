//! Core value types: hashes, addresses, coins, receipts.
//!
//! All monetary values are in base units (1 coin = 10^8 base units).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::ADDRESS_LEN;
use crate::error::ParseError;

/// A 32-byte hash value.
///
/// Used for block hashes, transaction hashes, log topics, and the UTXO set
/// digest.
///
/// Serializes as a lowercase hex string.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = ParseError;

    /// Parse a 64-character hex string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<32>(s)?))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte contract or account address.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The zero address.
    pub const ZERO: Self = Self([0u8; ADDRESS_LEN]);

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = ParseError;

    /// Parse a 40-character hex string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<ADDRESS_LEN>(s)?))
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(Hash256);
hex_serde!(Address);

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
    if s.len() != N * 2 {
        return Err(ParseError::InvalidLength {
            expected: N * 2,
            got: s.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|e| ParseError::InvalidHex(e.to_string()))?;
    Ok(out)
}

/// Reference to a specific output of a transaction.
///
/// Ordering is `(txid, index)`, which is the order the UTXO digest consumes.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Hash of the transaction that created the output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// An unspent transaction output as held by the UTXO store.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Coin {
    /// Locking script of the output.
    pub script: Vec<u8>,
    /// Value in base units.
    pub value: u64,
    /// Height of the block that created this output.
    pub height: u64,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
}

/// The chain tip as seen by one observer: `(height, hash)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash256,
}

impl ChainTip {
    pub fn new(height: u64, hash: Hash256) -> Self {
        Self { height, hash }
    }

    /// Confirmations a block at `height` has under this tip.
    ///
    /// `tip - height + 1`; zero for heights above the tip.
    pub fn confirmations(&self, height: u64) -> u64 {
        if height > self.height {
            0
        } else {
            self.height - height + 1
        }
    }
}

/// One structured log emitted while executing contract code.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct LogEntry {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics, position-significant.
    pub topics: Vec<Hash256>,
    /// Opaque payload.
    pub data: Vec<u8>,
}

/// The recorded outcome of executing one transaction's contract code.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Receipt {
    pub block_hash: Hash256,
    pub block_number: u64,
    pub transaction_hash: Hash256,
    pub transaction_index: u32,
    pub from: Address,
    pub to: Address,
    /// Contract created or called; zero when the transaction touched no contract.
    pub contract_address: Address,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    /// Execution status; zero means success.
    pub status: u32,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    /// Addresses this receipt is indexed under: the contract (or callee when
    /// no contract is recorded) followed by every emitting address, without
    /// repeats.
    pub fn touched_addresses(&self) -> Vec<Address> {
        let primary = if self.contract_address.is_zero() {
            self.to
        } else {
            self.contract_address
        };
        let mut out = Vec::with_capacity(1 + self.logs.len());
        if !primary.is_zero() {
            out.push(primary);
        }
        for log in &self.logs {
            if !out.contains(&log.address) {
                out.push(log.address);
            }
        }
        out
    }
}

/// One `(height, address)` row of the log index.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct HeightIndexEntry {
    pub height: u64,
    pub address: Address,
    /// Transactions at `height` that touched `address`, in block order.
    pub tx_hashes: Vec<Hash256>,
}

//! RocksDB-backed persistent storage.
//!
//! One column family per concern: the block index, block bodies (receipts
//! and coin changes), undo data, the coin set, the log height index,
//! receipts by transaction, and metadata. Mutations that must land together
//! use a [`WriteBatch`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, Snapshot, WriteBatch};

use strata_core::block_index::BlockRecord;
use strata_core::constants::ADDRESS_LEN;
use strata_core::error::{DigestError, StrataError};
use strata_core::traits::{CoinCursor, LogIndexStore, ReceiptStore, UtxoSnapshot};
use strata_core::types::{Address, Coin, Hash256, HeightIndexEntry, OutPoint, Receipt};

// --- Column family names ---

const CF_BLOCK_INDEX: &str = "block_index";
const CF_BLOCK_BODIES: &str = "block_bodies";
const CF_UNDO: &str = "undo";
const CF_COINS: &str = "coins";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_RECEIPTS: &str = "receipts";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_BLOCK_INDEX,
    CF_BLOCK_BODIES,
    CF_UNDO,
    CF_COINS,
    CF_HEIGHT_INDEX,
    CF_RECEIPTS,
    CF_METADATA,
];

// --- Metadata keys ---

const META_ACTIVE_TIP: &[u8] = b"active_tip";
const META_BEST_BLOCK: &[u8] = b"coins_best_block";
const META_LOG_EVENTS: &[u8] = b"log_events";

const OUTPOINT_KEY_LEN: usize = 32 + 4;
const HEIGHT_KEY_LEN: usize = 8 + ADDRESS_LEN;

/// Everything the node keeps about a block beyond its header.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockBody {
    pub tx_count: u64,
    /// Execution receipts in transaction order.
    pub receipts: Vec<Receipt>,
    /// Outputs created by the block.
    pub created: Vec<(OutPoint, Coin)>,
    /// Outputs spent by the block.
    pub spent: Vec<OutPoint>,
}

fn storage_err(e: impl std::fmt::Display) -> StrataError {
    StrataError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StrataError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StrataError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(storage_err)
}

fn outpoint_key(op: &OutPoint) -> [u8; OUTPOINT_KEY_LEN] {
    let mut key = [0u8; OUTPOINT_KEY_LEN];
    key[..32].copy_from_slice(op.txid.as_bytes());
    key[32..].copy_from_slice(&op.index.to_be_bytes());
    key
}

fn decode_outpoint_key(key: &[u8]) -> Option<OutPoint> {
    if key.len() != OUTPOINT_KEY_LEN {
        return None;
    }
    let txid: [u8; 32] = key[..32].try_into().ok()?;
    let index: [u8; 4] = key[32..].try_into().ok()?;
    Some(OutPoint::new(Hash256(txid), u32::from_be_bytes(index)))
}

fn height_key(height: u64, address: &Address) -> [u8; HEIGHT_KEY_LEN] {
    let mut key = [0u8; HEIGHT_KEY_LEN];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(address.as_bytes());
    key
}

fn decode_height_key(key: &[u8]) -> Option<(u64, Address)> {
    if key.len() != HEIGHT_KEY_LEN {
        return None;
    }
    let height: [u8; 8] = key[..8].try_into().ok()?;
    let address: [u8; ADDRESS_LEN] = key[8..].try_into().ok()?;
    Some((u64::from_be_bytes(height), Address(address)))
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, StrataError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StrataError::Storage(format!("invalid hash length {}", bytes.len())))?;
    Ok(Hash256(arr))
}

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StrataError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;
        Ok(Self { db })
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StrataError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StrataError::Storage(format!("missing column family: {name}")))
    }

    pub fn flush(&self) -> Result<(), StrataError> {
        self.db.flush().map_err(storage_err)
    }

    // --- Block index ---

    pub fn put_block_records<'a>(
        &self,
        records: impl IntoIterator<Item = &'a BlockRecord>,
    ) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_BLOCK_INDEX)?;
        let mut batch = WriteBatch::default();
        for record in records {
            batch.put_cf(cf, record.hash.as_bytes(), encode(record)?);
        }
        self.db.write(batch).map_err(storage_err)
    }

    pub fn load_block_records(&self) -> Result<Vec<BlockRecord>, StrataError> {
        let cf = self.cf_handle(CF_BLOCK_INDEX)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(storage_err)?;
                decode(&value)
            })
            .collect()
    }

    pub fn set_active_tip(&self, hash: &Hash256) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .put_cf(cf, META_ACTIVE_TIP, hash.as_bytes())
            .map_err(storage_err)
    }

    pub fn active_tip(&self) -> Result<Option<Hash256>, StrataError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .get_cf(cf, META_ACTIVE_TIP)
            .map_err(storage_err)?
            .map(|b| decode_hash(&b))
            .transpose()
    }

    // --- Block bodies ---

    pub fn put_block_body(&self, hash: &Hash256, body: &BlockBody) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_BLOCK_BODIES)?;
        self.db
            .put_cf(cf, hash.as_bytes(), encode(body)?)
            .map_err(storage_err)
    }

    pub fn block_body(&self, hash: &Hash256) -> Result<Option<BlockBody>, StrataError> {
        let cf = self.cf_handle(CF_BLOCK_BODIES)?;
        self.db
            .get_cf(cf, hash.as_bytes())
            .map_err(storage_err)?
            .map(|b| decode(&b))
            .transpose()
    }

    // --- Coins ---

    pub fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StrataError> {
        let cf = self.cf_handle(CF_COINS)?;
        self.db
            .get_cf(cf, outpoint_key(outpoint))
            .map_err(storage_err)?
            .map(|b| decode(&b))
            .transpose()
    }

    /// Hash of the block the coin set currently reflects.
    pub fn coins_best_block(&self) -> Result<Option<Hash256>, StrataError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .get_cf(cf, META_BEST_BLOCK)
            .map_err(storage_err)?
            .map(|b| decode_hash(&b))
            .transpose()
    }

    /// Apply a block's coin changes and record undo data, atomically.
    ///
    /// # Errors
    ///
    /// [`StrataError::InvalidBlock`] if the block spends an output that is
    /// not in the coin set.
    pub fn connect_coins(&self, hash: &Hash256, body: &BlockBody) -> Result<(), StrataError> {
        let cf_coins = self.cf_handle(CF_COINS)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut undo: Vec<(OutPoint, Coin)> = Vec::with_capacity(body.spent.len());
        let mut batch = WriteBatch::default();
        for op in &body.spent {
            let coin = self.get_coin(op)?.ok_or_else(|| {
                StrataError::InvalidBlock(format!("block {hash} spends missing output {op}"))
            })?;
            batch.delete_cf(cf_coins, outpoint_key(op));
            undo.push((*op, coin));
        }
        for (op, coin) in &body.created {
            batch.put_cf(cf_coins, outpoint_key(op), encode(coin)?);
        }
        batch.put_cf(cf_undo, hash.as_bytes(), encode(&undo)?);
        batch.put_cf(cf_meta, META_BEST_BLOCK, hash.as_bytes());
        self.db.write(batch).map_err(storage_err)
    }

    /// Revert [`connect_coins`](Self::connect_coins), leaving the coin set at
    /// `parent`.
    pub fn disconnect_coins(
        &self,
        hash: &Hash256,
        body: &BlockBody,
        parent: &Hash256,
    ) -> Result<(), StrataError> {
        let cf_coins = self.cf_handle(CF_COINS)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let undo_bytes = self
            .db
            .get_cf(cf_undo, hash.as_bytes())
            .map_err(storage_err)?
            .ok_or_else(|| StrataError::Storage(format!("missing undo data for block {hash}")))?;
        let undo: Vec<(OutPoint, Coin)> = decode(&undo_bytes)?;

        let mut batch = WriteBatch::default();
        for (op, _) in &body.created {
            batch.delete_cf(cf_coins, outpoint_key(op));
        }
        for (op, coin) in &undo {
            batch.put_cf(cf_coins, outpoint_key(op), encode(coin)?);
        }
        batch.delete_cf(cf_undo, hash.as_bytes());
        batch.put_cf(cf_meta, META_BEST_BLOCK, parent.as_bytes());
        self.db.write(batch).map_err(storage_err)
    }

    /// Point-in-time view of the coin set for digesting.
    pub fn utxo_snapshot(&self) -> Result<RocksUtxoSnapshot<'_>, StrataError> {
        let snapshot = self.db.snapshot();
        let best_block = snapshot
            .get_cf(self.cf_handle(CF_METADATA)?, META_BEST_BLOCK)
            .map_err(storage_err)?
            .map(|b| decode_hash(&b))
            .transpose()?
            .unwrap_or_default();
        Ok(RocksUtxoSnapshot {
            store: self,
            snapshot,
            best_block,
        })
    }

    // --- Log index flag ---

    /// Whether the log index was maintained the last time the node ran.
    pub fn log_events_flag(&self) -> Result<Option<bool>, StrataError> {
        let cf = self.cf_handle(CF_METADATA)?;
        Ok(self
            .db
            .get_cf(cf, META_LOG_EVENTS)
            .map_err(storage_err)?
            .map(|b| b.first() == Some(&1)))
    }

    pub fn set_log_events_flag(&self, enabled: bool) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .put_cf(cf, META_LOG_EVENTS, [u8::from(enabled)])
            .map_err(storage_err)
    }

    fn height_prefix_keys(&self, height: u64) -> Result<Vec<Box<[u8]>>, StrataError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        let prefix = height.to_be_bytes();
        let mut keys = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(storage_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl LogIndexStore for RocksStore {
    fn write_height(
        &self,
        height: u64,
        entries: &BTreeMap<Address, Vec<Hash256>>,
    ) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        let mut batch = WriteBatch::default();
        for key in self.height_prefix_keys(height)? {
            batch.delete_cf(cf, key);
        }
        for (address, txs) in entries {
            batch.put_cf(cf, height_key(height, address), encode(txs)?);
        }
        self.db.write(batch).map_err(storage_err)
    }

    fn erase_height(&self, height: u64) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        let mut batch = WriteBatch::default();
        for key in self.height_prefix_keys(height)? {
            batch.delete_cf(cf, key);
        }
        self.db.write(batch).map_err(storage_err)
    }

    fn scan_range(&self, from: u64, to: Option<u64>) -> Result<Vec<HeightIndexEntry>, StrataError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        let start = from.to_be_bytes();
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item.map_err(storage_err)?;
            let (height, address) = decode_height_key(&key)
                .ok_or_else(|| StrataError::Storage("malformed height index key".into()))?;
            if to.is_some_and(|to| height > to) {
                break;
            }
            out.push(HeightIndexEntry {
                height,
                address,
                tx_hashes: decode(&value)?,
            });
        }
        Ok(out)
    }

    fn highest_height(&self) -> Result<Option<u64>, StrataError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item.map_err(storage_err)?;
                Ok(decode_height_key(&key).map(|(h, _)| h))
            }
            None => Ok(None),
        }
    }

    fn wipe(&self) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(storage_err)?;
            batch.delete_cf(cf, key);
        }
        self.db.write(batch).map_err(storage_err)
    }
}

impl ReceiptStore for RocksStore {
    fn put_receipts(&self, receipts: &[Receipt]) -> Result<(), StrataError> {
        let cf = self.cf_handle(CF_RECEIPTS)?;
        let mut grouped: HashMap<Hash256, Vec<Receipt>> = HashMap::new();
        for r in receipts {
            grouped.entry(r.transaction_hash).or_default().push(r.clone());
        }
        let mut batch = WriteBatch::default();
        for (tx, rs) in &grouped {
            batch.put_cf(cf, tx.as_bytes(), encode(rs)?);
        }
        self.db.write(batch).map_err(storage_err)
    }

    fn receipts_for(&self, tx_hash: &Hash256) -> Result<Vec<Receipt>, StrataError> {
        let cf = self.cf_handle(CF_RECEIPTS)?;
        match self.db.get_cf(cf, tx_hash.as_bytes()).map_err(storage_err)? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }
}

/// Coin set as of one RocksDB snapshot.
pub struct RocksUtxoSnapshot<'a> {
    store: &'a RocksStore,
    snapshot: Snapshot<'a>,
    best_block: Hash256,
}

impl UtxoSnapshot for RocksUtxoSnapshot<'_> {
    fn best_block(&self) -> Hash256 {
        self.best_block
    }

    fn cursor(&self) -> CoinCursor<'_> {
        let cf = match self.store.cf_handle(CF_COINS) {
            Ok(cf) => cf,
            Err(e) => return Box::new(std::iter::once(Err(DigestError::Io(e.to_string())))),
        };
        Box::new(
            self.snapshot
                .iterator_cf(cf, IteratorMode::Start)
                .map(|item| {
                    let (key, value) = item.map_err(|e| DigestError::Io(e.to_string()))?;
                    let outpoint = decode_outpoint_key(&key)
                        .ok_or_else(|| DigestError::Io("malformed coin key".into()))?;
                    let coin: Coin =
                        decode(&value).map_err(|e| DigestError::Io(e.to_string()))?;
                    Ok((outpoint, coin))
                }),
        )
    }

    fn estimate_size(&self) -> u64 {
        self.store
            .cf_handle(CF_COINS)
            .ok()
            .and_then(|cf| {
                self.store
                    .db
                    .property_int_value_cf(cf, "rocksdb.estimate-live-data-size")
                    .ok()
                    .flatten()
            })
            .unwrap_or(0)
    }
}

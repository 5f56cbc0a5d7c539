//! In-memory [`LogIndexStore`] and [`ReceiptStore`].
//!
//! Used by tests and by nodes running without a persistent index.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::RwLock;

use strata_core::constants::ADDRESS_LEN;
use strata_core::error::StrataError;
use strata_core::traits::{LogIndexStore, ReceiptStore};
use strata_core::types::{Address, Hash256, HeightIndexEntry, Receipt};

/// Height-major log index held in a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: RwLock<BTreeMap<(u64, Address), Vec<Hash256>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn height_bounds(from: u64, to: Option<u64>) -> (Bound<(u64, Address)>, Bound<(u64, Address)>) {
    let lo = Bound::Included((from, Address::ZERO));
    let hi = match to {
        Some(to) => Bound::Included((to, Address([0xFF; ADDRESS_LEN]))),
        None => Bound::Unbounded,
    };
    (lo, hi)
}

/// Drop every row at `height` by walking only that height's key range.
fn erase_rows(map: &mut BTreeMap<(u64, Address), Vec<Hash256>>, height: u64) -> usize {
    let keys: Vec<(u64, Address)> = map
        .range(height_bounds(height, Some(height)))
        .map(|(key, _)| *key)
        .collect();
    for key in &keys {
        map.remove(key);
    }
    keys.len()
}

impl LogIndexStore for MemoryLogStore {
    fn write_height(
        &self,
        height: u64,
        entries: &BTreeMap<Address, Vec<Hash256>>,
    ) -> Result<(), StrataError> {
        let mut map = self.entries.write();
        erase_rows(&mut map, height);
        for (address, txs) in entries {
            map.insert((height, *address), txs.clone());
        }
        Ok(())
    }

    fn erase_height(&self, height: u64) -> Result<(), StrataError> {
        erase_rows(&mut self.entries.write(), height);
        Ok(())
    }

    fn scan_range(&self, from: u64, to: Option<u64>) -> Result<Vec<HeightIndexEntry>, StrataError> {
        if to.is_some_and(|to| to < from) {
            return Ok(Vec::new());
        }
        Ok(self
            .entries
            .read()
            .range(height_bounds(from, to))
            .map(|((height, address), txs)| HeightIndexEntry {
                height: *height,
                address: *address,
                tx_hashes: txs.clone(),
            })
            .collect())
    }

    fn highest_height(&self) -> Result<Option<u64>, StrataError> {
        Ok(self.entries.read().keys().next_back().map(|(h, _)| *h))
    }

    fn wipe(&self) -> Result<(), StrataError> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Receipts keyed by transaction hash.
#[derive(Debug, Default)]
pub struct MemoryReceiptStore {
    receipts: RwLock<HashMap<Hash256, Vec<Receipt>>>,
}

impl MemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptStore for MemoryReceiptStore {
    fn put_receipts(&self, receipts: &[Receipt]) -> Result<(), StrataError> {
        let mut grouped: HashMap<Hash256, Vec<Receipt>> = HashMap::new();
        for r in receipts {
            grouped.entry(r.transaction_hash).or_default().push(r.clone());
        }
        self.receipts.write().extend(grouped);
        Ok(())
    }

    fn receipts_for(&self, tx_hash: &Hash256) -> Result<Vec<Receipt>, StrataError> {
        Ok(self.receipts.read().get(tx_hash).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> Address {
        Address([seed; 20])
    }

    fn tx(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn row(entries: &[(Address, &[Hash256])]) -> BTreeMap<Address, Vec<Hash256>> {
        entries.iter().map(|(a, t)| (*a, t.to_vec())).collect()
    }

    #[test]
    fn write_height_replaces_previous_rows() {
        let store = MemoryLogStore::new();
        store.write_height(5, &row(&[(addr(1), &[tx(1)]), (addr(2), &[tx(2)])])).unwrap();
        store.write_height(5, &row(&[(addr(3), &[tx(3)])])).unwrap();
        let rows = store.scan_range(5, Some(5)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, addr(3));
    }

    #[test]
    fn scan_range_is_height_then_address_ordered() {
        let store = MemoryLogStore::new();
        store.write_height(7, &row(&[(addr(2), &[tx(1)]), (addr(1), &[tx(2)])])).unwrap();
        store.write_height(6, &row(&[(addr(9), &[tx(3)])])).unwrap();
        store.write_height(8, &row(&[(addr(0xFF), &[tx(4)])])).unwrap();
        let keys: Vec<(u64, Address)> = store
            .scan_range(6, Some(8))
            .unwrap()
            .into_iter()
            .map(|e| (e.height, e.address))
            .collect();
        assert_eq!(keys, vec![(6, addr(9)), (7, addr(1)), (7, addr(2)), (8, addr(0xFF))]);
        assert_eq!(store.scan_range(7, None).unwrap().len(), 3);
        assert!(store.scan_range(9, Some(3)).unwrap().is_empty());
    }

    #[test]
    fn erase_and_highest() {
        let store = MemoryLogStore::new();
        store.write_height(1, &row(&[(addr(1), &[tx(1)])])).unwrap();
        store.write_height(2, &row(&[(addr(1), &[tx(2)])])).unwrap();
        assert_eq!(store.highest_height().unwrap(), Some(2));
        store.erase_height(2).unwrap();
        assert_eq!(store.highest_height().unwrap(), Some(1));
        store.wipe().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.highest_height().unwrap(), None);
    }

    #[test]
    fn erase_touches_only_the_given_height() {
        let mut map = BTreeMap::new();
        for h in 4..=6 {
            map.insert((h, Address::ZERO), vec![tx(1)]);
            map.insert((h, Address([0xFF; ADDRESS_LEN])), vec![tx(2)]);
        }
        assert_eq!(erase_rows(&mut map, 5), 2);
        let heights: Vec<u64> = map.keys().map(|(h, _)| *h).collect();
        assert_eq!(heights, vec![4, 4, 6, 6]);
        assert_eq!(erase_rows(&mut map, 9), 0);
    }

    #[test]
    fn receipts_replace_per_transaction() {
        let store = MemoryReceiptStore::new();
        let mut r = Receipt {
            block_hash: Hash256::ZERO,
            block_number: 1,
            transaction_hash: tx(1),
            transaction_index: 0,
            from: addr(1),
            to: addr(2),
            contract_address: Address::ZERO,
            cumulative_gas_used: 10,
            gas_used: 10,
            status: 0,
            logs: vec![],
        };
        store.put_receipts(&[r.clone()]).unwrap();
        r.block_number = 2;
        store.put_receipts(&[r.clone()]).unwrap();
        assert_eq!(store.receipts_for(&tx(1)).unwrap(), vec![r]);
        assert!(store.receipts_for(&tx(2)).unwrap().is_empty());
    }
}

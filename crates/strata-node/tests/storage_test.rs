//! RocksDB storage tests.

use std::collections::BTreeMap;

use strata_core::block_index::{BlockIndex, BlockValidity};
use strata_core::constants::COIN;
use strata_core::digest::DigestEngine;
use strata_core::error::StrataError;
use strata_core::traits::{LogIndexStore, ReceiptStore, UtxoSnapshot};
use strata_core::types::{Address, Coin, Hash256, LogEntry, OutPoint, Receipt};
use strata_core::utxo::MemoryUtxoSet;
use strata_node_lib::storage::{BlockBody, RocksStore};

fn h(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

fn coin(value: u64, height: u64) -> Coin {
    Coin {
        script: vec![0x51, value as u8],
        value,
        height,
        is_coinbase: height == 0,
    }
}

fn receipt(tx: Hash256) -> Receipt {
    Receipt {
        block_hash: h(0xB1),
        block_number: 1,
        transaction_hash: tx,
        transaction_index: 0,
        from: addr(1),
        to: addr(2),
        contract_address: addr(2),
        cumulative_gas_used: 30_000,
        gas_used: 30_000,
        status: 0,
        logs: vec![LogEntry {
            address: addr(2),
            topics: vec![h(9)],
            data: vec![1, 2, 3],
        }],
    }
}

#[test]
fn block_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = BlockIndex::new();
    let g = index.accept_header(h(1), None, 1).unwrap();
    let b = index.accept_header(h(2), Some(h(1)), 1).unwrap();
    for id in [g, b] {
        index.mark_data(id, 1);
        index.raise_validity(id, BlockValidity::Scripts);
    }
    index.set_tip(b);
    {
        let store = RocksStore::open(dir.path()).unwrap();
        let records: Vec<_> = index.iter().map(|(id, _)| index.record(id)).collect();
        store.put_block_records(&records).unwrap();
        store.set_active_tip(&h(2)).unwrap();
    }
    let store = RocksStore::open(dir.path()).unwrap();
    let restored =
        BlockIndex::restore(store.load_block_records().unwrap(), store.active_tip().unwrap())
            .unwrap();
    assert_eq!(restored.tip(), index.tip());
    assert_eq!(restored.chain_tips(), index.chain_tips());
}

#[test]
fn connect_and_disconnect_coins_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();

    let genesis = BlockBody {
        tx_count: 1,
        created: vec![(OutPoint::new(h(0x10), 0), coin(50 * COIN, 0))],
        ..Default::default()
    };
    store.connect_coins(&h(1), &genesis).unwrap();

    let spend = BlockBody {
        tx_count: 1,
        created: vec![
            (OutPoint::new(h(0x11), 0), coin(20 * COIN, 1)),
            (OutPoint::new(h(0x11), 1), coin(30 * COIN, 1)),
        ],
        spent: vec![OutPoint::new(h(0x10), 0)],
        ..Default::default()
    };
    store.connect_coins(&h(2), &spend).unwrap();
    assert!(store.get_coin(&OutPoint::new(h(0x10), 0)).unwrap().is_none());
    assert_eq!(store.coins_best_block().unwrap(), Some(h(2)));

    store.disconnect_coins(&h(2), &spend, &h(1)).unwrap();
    assert_eq!(
        store.get_coin(&OutPoint::new(h(0x10), 0)).unwrap(),
        Some(coin(50 * COIN, 0))
    );
    assert!(store.get_coin(&OutPoint::new(h(0x11), 0)).unwrap().is_none());
    assert_eq!(store.coins_best_block().unwrap(), Some(h(1)));
}

#[test]
fn spending_missing_output_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let body = BlockBody {
        spent: vec![OutPoint::new(h(0x77), 0)],
        ..Default::default()
    };
    assert!(matches!(
        store.connect_coins(&h(1), &body),
        Err(StrataError::InvalidBlock(_))
    ));
}

#[test]
fn snapshot_digest_matches_memory_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let created = vec![
        (OutPoint::new(h(0x30), 1), coin(7, 0)),
        (OutPoint::new(h(0x20), 0), coin(5, 0)),
        (OutPoint::new(h(0x30), 0), coin(6, 0)),
    ];
    store
        .connect_coins(
            &h(1),
            &BlockBody {
                tx_count: 2,
                created: created.clone(),
                ..Default::default()
            },
        )
        .unwrap();

    let mut memory: MemoryUtxoSet = created.into_iter().collect();
    memory.set_best_block(h(1));

    let snapshot = store.utxo_snapshot().unwrap();
    assert_eq!(snapshot.best_block(), h(1));
    let engine = DigestEngine::new();
    let from_disk = engine.compute(&snapshot, 0).unwrap();
    let from_memory = engine.compute(&memory, 0).unwrap();
    assert_eq!(from_disk.digest, from_memory.digest);
    assert_eq!(from_disk.transactions, 2);
    assert_eq!(from_disk.outputs, 3);
    assert_eq!(from_disk.total_amount, 18);
}

#[test]
fn snapshot_is_isolated_from_later_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let first = BlockBody {
        created: vec![(OutPoint::new(h(0x40), 0), coin(1, 0))],
        ..Default::default()
    };
    store.connect_coins(&h(1), &first).unwrap();
    let snapshot = store.utxo_snapshot().unwrap();
    let before = DigestEngine::new().compute(&snapshot, 0).unwrap();

    let second = BlockBody {
        created: vec![(OutPoint::new(h(0x41), 0), coin(2, 1))],
        ..Default::default()
    };
    store.connect_coins(&h(2), &second).unwrap();
    let again = DigestEngine::new().compute(&snapshot, 0).unwrap();
    assert_eq!(before, again);
    assert_eq!(again.outputs, 1);
}

#[test]
fn height_index_overwrite_scan_and_wipe() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    let row = |a: u8, t: u8| -> BTreeMap<Address, Vec<Hash256>> {
        BTreeMap::from([(addr(a), vec![h(t)])])
    };
    store.write_height(5, &row(1, 1)).unwrap();
    store.write_height(6, &row(2, 2)).unwrap();
    store.write_height(256, &row(3, 3)).unwrap();
    store.write_height(5, &row(4, 4)).unwrap();

    let rows = store.scan_range(5, Some(6)).unwrap();
    let keys: Vec<(u64, Address)> = rows.iter().map(|e| (e.height, e.address)).collect();
    assert_eq!(keys, vec![(5, addr(4)), (6, addr(2))]);
    assert_eq!(store.scan_range(6, None).unwrap().len(), 2);
    assert_eq!(store.highest_height().unwrap(), Some(256));

    store.erase_height(256).unwrap();
    assert_eq!(store.highest_height().unwrap(), Some(6));
    store.wipe().unwrap();
    assert_eq!(store.highest_height().unwrap(), None);
}

#[test]
fn receipts_and_flags_persist() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = RocksStore::open(dir.path()).unwrap();
        store.put_receipts(&[receipt(h(0xA1))]).unwrap();
        store.set_log_events_flag(true).unwrap();
        store
            .put_block_body(&h(1), &BlockBody { tx_count: 3, ..Default::default() })
            .unwrap();
    }
    let store = RocksStore::open(dir.path()).unwrap();
    assert_eq!(store.receipts_for(&h(0xA1)).unwrap(), vec![receipt(h(0xA1))]);
    assert!(store.receipts_for(&h(0xA2)).unwrap().is_empty());
    assert_eq!(store.log_events_flag().unwrap(), Some(true));
    assert_eq!(store.block_body(&h(1)).unwrap().map(|b| b.tx_count), Some(3));
    assert!(store.block_body(&h(2)).unwrap().is_none());
}

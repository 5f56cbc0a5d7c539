//! End-to-end node tests over a temporary RocksDB.

use std::sync::Arc;
use std::time::Duration;

use strata_core::block_index::ChainTipStatus;
use strata_core::error::{BlockIndexError, LogIndexError, StrataError};
use strata_core::types::{Address, Coin, Hash256, LogEntry, OutPoint, Receipt};
use strata_index::{BlockHeightArg, SearchParams, WaitParams};
use strata_node_lib::config::NodeConfig;
use strata_node_lib::node::Node;
use strata_node_lib::storage::BlockBody;

fn h(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

fn contract() -> Address {
    Address([0xC0; 20])
}

fn config(dir: &std::path::Path) -> NodeConfig {
    NodeConfig {
        data_dir: dir.to_path_buf(),
        wait_poll_interval_ms: 10,
        ..NodeConfig::default()
    }
}

/// Block body with one coinbase output and one contract receipt.
fn body(block: Hash256, height: u64, tx: Hash256) -> BlockBody {
    BlockBody {
        tx_count: 1,
        receipts: vec![Receipt {
            block_hash: block,
            block_number: height,
            transaction_hash: tx,
            transaction_index: 0,
            from: Address([1; 20]),
            to: contract(),
            contract_address: contract(),
            cumulative_gas_used: 21_000,
            gas_used: 21_000,
            status: 0,
            logs: vec![LogEntry {
                address: contract(),
                topics: vec![h(0xE0)],
                data: vec![],
            }],
        }],
        created: vec![(
            OutPoint::new(tx, 0),
            Coin {
                script: vec![0x51],
                value: 50,
                height,
                is_coinbase: true,
            },
        )],
        spent: vec![],
    }
}

/// Add a full block `hash` on `parent` at `height`, transaction `tx`.
fn add(node: &Node, hash: Hash256, parent: Option<Hash256>, height: u64, tx: Hash256) {
    node.accept_header(hash, parent, 1).unwrap();
    node.accept_block(hash, body(hash, height, tx)).unwrap();
}

/// Linear chain of blocks `h(1)..=h(n)` with transactions `h(0x80 + i)`.
fn linear(node: &Node, n: u8) {
    add(node, h(1), None, 0, h(0x81));
    for i in 2..=n {
        add(node, h(i), Some(h(i - 1)), u64::from(i - 1), h(0x80 + i));
    }
}

fn search_all(node: &Node) -> Vec<Hash256> {
    node.search_logs(&SearchParams::new(BlockHeightArg::Number(0), BlockHeightArg::Latest))
        .unwrap()
        .into_iter()
        .map(|r| r.transaction_hash)
        .collect()
}

#[test]
fn linear_chain_is_active() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 4);
    let tip = node.tip().unwrap();
    assert_eq!((tip.height, tip.hash), (3, h(4)));
    let tips = node.chain_tips();
    assert_eq!(tips.len(), 1);
    assert_eq!(tips[0].status, ChainTipStatus::Active);
    assert_eq!(tips[0].branch_len, 0);
}

#[test]
fn header_only_fork_reported() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 3);
    node.accept_header(h(30), Some(h(2)), 1).unwrap();
    let tips = node.chain_tips();
    assert_eq!(tips.len(), 2);
    let fork = tips.iter().find(|t| t.hash == h(30)).unwrap();
    assert_eq!(fork.status, ChainTipStatus::HeadersOnly);
    assert_eq!(fork.branch_len, 1);
}

#[test]
fn digest_tracks_reorg() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 3);
    let at_three = node.utxo_digest().unwrap();
    assert_eq!(at_three.height, 2);
    assert_eq!(at_three.best_block, h(3));
    assert_eq!(at_three.outputs, 3);

    add(&node, h(4), Some(h(3)), 3, h(0x84));
    assert_ne!(node.utxo_digest().unwrap().digest, at_three.digest);

    node.invalidate_block(&h(4)).unwrap();
    let back = node.utxo_digest().unwrap();
    assert_eq!(back.digest, at_three.digest);
    assert_eq!(back.height, 2);
    assert_eq!(back.total_amount, at_three.total_amount);
}

#[test]
fn invalidate_and_reconsider_replay_log_index() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 5);
    assert_eq!(search_all(&node).len(), 5);

    let plan = node.invalidate_block(&h(3)).unwrap();
    assert_eq!(plan.disconnected.len(), 3);
    assert_eq!(node.tip().unwrap().hash, h(2));
    assert_eq!(search_all(&node), vec![h(0x81), h(0x82)]);
    let invalid = node.chain_tips().into_iter().find(|t| t.hash == h(5)).unwrap();
    assert_eq!(invalid.status, ChainTipStatus::Invalid);

    node.reconsider_block(&h(3)).unwrap();
    assert_eq!(node.tip().unwrap().hash, h(5));
    assert_eq!(search_all(&node).len(), 5);
}

#[test]
fn competing_branch_replaces_rows_at_same_height() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 3);
    // Two-block branch from h(2) outweighs h(3).
    add(&node, h(40), Some(h(2)), 2, h(0xA0));
    add(&node, h(41), Some(h(40)), 3, h(0xA1));
    assert_eq!(node.tip().unwrap().hash, h(41));

    let txs = search_all(&node);
    assert_eq!(txs, vec![h(0x81), h(0x82), h(0xA0), h(0xA1)]);
    assert!(!txs.contains(&h(0x83)));
}

#[test]
fn rejected_block_leaves_chain_on_stored_tip() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 2);
    let before = node.utxo_digest().unwrap();

    let mut bad = body(h(3), 2, h(0x83));
    bad.spent.push(OutPoint::new(h(0xEE), 0));
    node.accept_header(h(3), Some(h(2)), 1).unwrap();
    assert!(matches!(node.accept_block(h(3), bad), Err(StrataError::InvalidBlock(_))));

    assert_eq!(node.tip().unwrap().hash, h(2));
    let after = node.utxo_digest().unwrap();
    assert_eq!((after.height, after.digest), (1, before.digest));
    assert_eq!(search_all(&node), vec![h(0x81), h(0x82)]);
    let rejected = node.chain_tips().into_iter().find(|t| t.hash == h(3)).unwrap();
    assert_eq!(rejected.status, ChainTipStatus::Invalid);

    // A valid sibling still extends the chain.
    add(&node, h(4), Some(h(2)), 2, h(0x84));
    assert_eq!(node.tip().unwrap().hash, h(4));
    assert_eq!(node.utxo_digest().unwrap().height, 2);
}

#[test]
fn reorg_failing_midway_returns_to_previous_chain() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 3);
    let before = node.utxo_digest().unwrap();

    // h(1) <- h(50) <- h(51, bad) <- h(52): only h(52) outweighs h(3).
    add(&node, h(50), Some(h(1)), 1, h(0xD0));
    let mut bad = body(h(51), 2, h(0xD1));
    bad.spent.push(OutPoint::new(h(0xEE), 0));
    node.accept_header(h(51), Some(h(50)), 1).unwrap();
    node.accept_block(h(51), bad).unwrap();
    assert_eq!(node.tip().unwrap().hash, h(3));

    node.accept_header(h(52), Some(h(51)), 1).unwrap();
    assert!(matches!(
        node.accept_block(h(52), body(h(52), 3, h(0xD2))),
        Err(StrataError::InvalidBlock(_))
    ));

    assert_eq!(node.tip().unwrap().hash, h(3));
    let after = node.utxo_digest().unwrap();
    assert_eq!(after.best_block, h(3));
    assert_eq!(after.digest, before.digest);
    assert_eq!(search_all(&node), vec![h(0x81), h(0x82), h(0x83)]);
    for tip in node.chain_tips() {
        let expected = if tip.hash == h(3) {
            ChainTipStatus::Active
        } else {
            ChainTipStatus::Invalid
        };
        assert_eq!(tip.status, expected, "{}", tip.hash);
    }

    // The rollback is persisted.
    node.shutdown().unwrap();
    drop(node);
    let node = Node::open(config(dir.path())).unwrap();
    assert_eq!(node.tip().unwrap().hash, h(3));
    assert_eq!(node.utxo_digest().unwrap().digest, before.digest);
}

#[test]
fn unknown_block_errors() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 2);
    assert!(matches!(
        node.invalidate_block(&h(99)),
        Err(StrataError::BlockIndex(BlockIndexError::NotFound(_)))
    ));
    assert!(matches!(
        node.accept_block(h(99), BlockBody::default()),
        Err(StrataError::BlockIndex(BlockIndexError::NotFound(_)))
    ));
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (tip, digest) = {
        let node = Node::open(config(dir.path())).unwrap();
        linear(&node, 4);
        node.invalidate_block(&h(4)).unwrap();
        let out = (node.tip().unwrap(), node.utxo_digest().unwrap().digest);
        node.shutdown().unwrap();
        out
    };
    let node = Node::open(config(dir.path())).unwrap();
    assert_eq!(node.tip().unwrap(), tip);
    assert_eq!(node.utxo_digest().unwrap().digest, digest);
    let invalid = node.chain_tips().into_iter().find(|t| t.hash == h(4)).unwrap();
    assert_eq!(invalid.status, ChainTipStatus::Invalid);
    assert_eq!(search_all(&node).len(), 3);
}

#[test]
fn enabling_log_index_rebuilds_it() {
    let dir = tempfile::tempdir().unwrap();
    {
        let node = Node::open(NodeConfig {
            log_events: false,
            ..config(dir.path())
        })
        .unwrap();
        linear(&node, 3);
        assert!(matches!(
            node.search_logs(&SearchParams::new(BlockHeightArg::Number(0), BlockHeightArg::Latest)),
            Err(StrataError::LogIndex(LogIndexError::IndexDisabled))
        ));
        node.shutdown().unwrap();
    }
    let node = Node::open(config(dir.path())).unwrap();
    assert_eq!(search_all(&node), vec![h(0x81), h(0x82), h(0x83)]);
    assert_eq!(node.transaction_receipts(&h(0x82)).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiter_sees_new_block_and_shutdown_releases_waiters() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::open(config(dir.path())).unwrap();
    linear(&node, 2);

    let params = WaitParams {
        minconf: Some(1),
        ..Default::default()
    };
    let waiter = {
        let node = Arc::clone(&node);
        let params = params.clone();
        tokio::spawn(async move { node.wait_for_logs(&params).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    add(&node, h(3), Some(h(2)), 2, h(0x83));
    let out = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(out.entries.len(), 1);
    assert_eq!(out.entries[0].transaction_hash, h(0x83));
    assert_eq!(out.next_from, 3);

    let waiter = {
        let node = Arc::clone(&node);
        tokio::spawn(async move { node.wait_for_logs(&params).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    node.shutdown().unwrap();
    let out = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(out.is_none());
}

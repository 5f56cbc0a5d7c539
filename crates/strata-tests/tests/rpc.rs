//! JSON-RPC end-to-end tests against a node on a temporary database.

use std::sync::Arc;

use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::server::ServerHandle;
use serde_json::Value;

use strata_core::types::{Coin, Hash256, OutPoint, Receipt};
use strata_index::WaitOutcome;
use strata_node_lib::config::NodeConfig;
use strata_node_lib::node::Node;
use strata_node_lib::rpc::{ChainTipJson, TxOutSetInfoJson, start_rpc_server};
use strata_node_lib::storage::BlockBody;
use strata_tests::helpers::*;

struct Harness {
    client: HttpClient,
    node: Arc<Node>,
    handle: ServerHandle,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::open(NodeConfig {
            data_dir: dir.path().to_path_buf(),
            wait_poll_interval_ms: 10,
            ..NodeConfig::default()
        })
        .unwrap();
        let (addr, handle) = start_rpc_server("127.0.0.1:0", Arc::clone(&node)).await.unwrap();
        let client = HttpClientBuilder::default()
            .build(format!("http://{addr}"))
            .unwrap();
        Self {
            client,
            node,
            handle,
            _dir: dir,
        }
    }

    /// Add a full block at `height` on `parent` carrying one contract receipt.
    fn add(&self, branch: u8, parent: Option<Hash256>, height: u64) -> Hash256 {
        let hash = block_hash(branch, height);
        let tx = tx_hash(&hash, 0);
        self.node.accept_header(hash, parent, 1).unwrap();
        self.node
            .accept_block(
                hash,
                BlockBody {
                    tx_count: 1,
                    receipts: vec![contract_receipt(hash, height, tx, addr(0xC0), vec![topic(branch)])],
                    created: vec![(
                        OutPoint::new(tx, 0),
                        Coin {
                            script: vec![0x51],
                            value: 25 * 100_000_000,
                            height,
                            is_coinbase: true,
                        },
                    )],
                    spent: Vec::new(),
                },
            )
            .unwrap();
        hash
    }

    fn linear(&self, n: u64) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        let mut parent = None;
        for height in 0..n {
            let hash = self.add(0, parent, height);
            hashes.push(hash);
            parent = Some(hash);
        }
        hashes
    }

    async fn stop(self) {
        self.node.shutdown().unwrap();
        self.handle.stop().unwrap();
        self.handle.stopped().await;
    }
}

fn error_code(err: ClientError) -> i32 {
    match err {
        ClientError::Call(e) => e.code(),
        other => panic!("expected call error, got {other:?}"),
    }
}

#[tokio::test]
async fn chain_queries() {
    let h = Harness::start().await;
    let blocks = h.linear(4);

    let count: u64 = h.client.request("getblockcount", rpc_params![]).await.unwrap();
    assert_eq!(count, 3);
    let best: String = h.client.request("getbestblockhash", rpc_params![]).await.unwrap();
    assert_eq!(best, blocks[3].to_string());

    // Fork off block 1.
    let fork = h.add(1, Some(blocks[1]), 2);
    let tips: Vec<ChainTipJson> = h.client.request("getchaintips", rpc_params![]).await.unwrap();
    assert_eq!(tips.len(), 2);
    assert_eq!(tips[0].status, "active");
    assert_eq!(tips[0].branchlen, 0);
    let fork_tip = tips.iter().find(|t| t.hash == fork.to_string()).unwrap();
    assert_eq!(fork_tip.status, "valid-fork");
    assert_eq!(fork_tip.branchlen, 1);
    h.stop().await;
}

#[tokio::test]
async fn txout_set_info_follows_invalidate_and_reconsider() {
    let h = Harness::start().await;
    let blocks = h.linear(3);

    let info: TxOutSetInfoJson = h.client.request("gettxoutsetinfo", rpc_params![]).await.unwrap();
    assert_eq!(info.height, 2);
    assert_eq!(info.bestblock, blocks[2].to_string());
    assert_eq!(info.txouts, 3);
    assert_eq!(info.transactions, 3);
    assert_eq!(info.total_amount, 75.0);
    assert_eq!(info.hash_serialized.len(), 64);

    let () = h
        .client
        .request("invalidateblock", rpc_params![blocks[2].to_string()])
        .await
        .unwrap();
    let after: TxOutSetInfoJson = h.client.request("gettxoutsetinfo", rpc_params![]).await.unwrap();
    assert_eq!(after.height, 1);
    assert_eq!(after.txouts, 2);
    assert_ne!(after.hash_serialized, info.hash_serialized);

    let tips: Vec<ChainTipJson> = h.client.request("getchaintips", rpc_params![]).await.unwrap();
    let invalid = tips.iter().find(|t| t.hash == blocks[2].to_string()).unwrap();
    assert_eq!(invalid.status, "invalid");

    let () = h
        .client
        .request("reconsiderblock", rpc_params![blocks[2].to_string()])
        .await
        .unwrap();
    let back: TxOutSetInfoJson = h.client.request("gettxoutsetinfo", rpc_params![]).await.unwrap();
    assert_eq!(back.hash_serialized, info.hash_serialized);
    h.stop().await;
}

#[tokio::test]
async fn searchlogs_filters_and_gates() {
    let h = Harness::start().await;
    let blocks = h.linear(5);

    let all: Vec<Receipt> = h
        .client
        .request("searchlogs", rpc_params![0, "latest"])
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[4].block_hash, blocks[4]);

    let gated: Vec<Receipt> = h
        .client
        .request("searchlogs", rpc_params![0, "latest", Value::Null, 3])
        .await
        .unwrap();
    let heights: Vec<u64> = gated.iter().map(|r| r.block_number).collect();
    assert_eq!(heights, vec![0, 1, 2]);

    let filter = serde_json::json!({ "addresses": [addr(0xC0)], "topics": [topic(0)] });
    let matched: Vec<Receipt> = h
        .client
        .request("searchlogs", rpc_params![1, 2, filter])
        .await
        .unwrap();
    assert_eq!(matched.len(), 2);

    let other = serde_json::json!({ "addresses": [addr(0xEE)] });
    let none: Vec<Receipt> = h
        .client
        .request("searchlogs", rpc_params![0, "latest", other])
        .await
        .unwrap();
    assert!(none.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn waitforlogs_returns_confirmed_range() {
    let h = Harness::start().await;
    h.linear(5);

    let out: WaitOutcome = h
        .client
        .request("waitforlogs", rpc_params![1, 3, Value::Null, 1])
        .await
        .unwrap();
    let heights: Vec<u64> = out.entries.iter().map(|m| m.block_number).collect();
    assert_eq!(heights, vec![1, 2, 3]);
    assert_eq!(out.next_from, 4);

    // Single-height range at the tip.
    let at_tip: WaitOutcome = h
        .client
        .request("waitforlogs", rpc_params![4, 4, Value::Null, 1])
        .await
        .unwrap();
    assert_eq!(at_tip.entries.len(), 1);
    assert_eq!(at_tip.next_from, 5);

    // -1 leaves the range open above.
    let open: WaitOutcome = h
        .client
        .request("waitforlogs", rpc_params![2, -1, Value::Null, 1])
        .await
        .unwrap();
    let heights: Vec<u64> = open.entries.iter().map(|m| m.block_number).collect();
    assert_eq!(heights, vec![2, 3, 4]);
    assert_eq!(open.next_from, 5);

    let err = h
        .client
        .request::<WaitOutcome, _>("waitforlogs", rpc_params![2, -2, Value::Null, 1])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Call(_)));
    h.stop().await;
}

#[tokio::test]
async fn waitforlogs_is_released_on_shutdown() {
    let h = Harness::start().await;
    h.linear(2);
    h.node.shutdown().unwrap();

    let err = h
        .client
        .request::<WaitOutcome, _>("waitforlogs", rpc_params![10, -1, Value::Null, 1])
        .await
        .unwrap_err();
    match err {
        ClientError::Call(e) => {
            assert_eq!(e.code(), -1);
            assert!(e.message().contains("shutting down"), "{}", e.message());
        }
        other => panic!("expected call error, got {other:?}"),
    }
    h.stop().await;
}

#[tokio::test]
async fn errors_carry_codes() {
    let h = Harness::start().await;
    let blocks = h.linear(2);

    let err = h
        .client
        .request::<(), _>("invalidateblock", rpc_params!["not-a-hash"])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), -8);

    let err = h
        .client
        .request::<(), _>("reconsiderblock", rpc_params![Hash256([0x99; 32]).to_string()])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), -5);

    let err = h
        .client
        .request::<Vec<Receipt>, _>("searchlogs", rpc_params![2, 1])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), -8);

    let err = h
        .client
        .request::<Vec<Receipt>, _>("searchlogs", rpc_params![-1, "latest"])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Call(_)));

    let receipts: Vec<Receipt> = h
        .client
        .request("gettransactionreceipt", rpc_params![tx_hash(&blocks[1], 0).to_string()])
        .await
        .unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].block_number, 1);
    h.stop().await;
}

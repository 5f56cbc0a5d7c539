//! JSON-RPC server for the Strata node.
//!
//! Uses jsonrpsee 0.24. Method names and result shapes follow the familiar
//! Bitcoin-style node RPC; amounts are reported in whole coins.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use strata_core::block_index::ChainTipInfo;
use strata_core::constants::COIN;
use strata_core::digest::UtxoDigestResult;
use strata_core::error::{BlockIndexError, DigestError, LogIndexError, StrataError};
use strata_core::types::{Hash256, Receipt};
use strata_index::{BlockHeightArg, LogFilter, SearchParams, WaitBound, WaitOutcome, WaitParams};

use crate::node::Node;

/// One entry of `getchaintips`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainTipJson {
    pub height: u64,
    pub hash: String,
    pub branchlen: u64,
    /// One of `active`, `invalid`, `headers-only`, `valid-fork`,
    /// `valid-headers`, `unknown`.
    pub status: String,
}

impl From<ChainTipInfo> for ChainTipJson {
    fn from(tip: ChainTipInfo) -> Self {
        Self {
            height: tip.height,
            hash: tip.hash.to_string(),
            branchlen: tip.branch_len,
            status: tip.status.to_string(),
        }
    }
}

/// Result of `gettxoutsetinfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxOutSetInfoJson {
    pub height: u64,
    pub bestblock: String,
    pub transactions: u64,
    pub txouts: u64,
    pub hash_serialized: String,
    pub disk_size: u64,
    /// Total value in coins (not base units).
    pub total_amount: f64,
}

impl From<UtxoDigestResult> for TxOutSetInfoJson {
    fn from(r: UtxoDigestResult) -> Self {
        Self {
            height: r.height,
            bestblock: r.best_block.to_string(),
            transactions: r.transactions,
            txouts: r.outputs,
            hash_serialized: r.digest.to_string(),
            disk_size: r.disk_size,
            total_amount: r.total_amount as f64 / COIN as f64,
        }
    }
}

/// Parse a 64-character hex string into a Hash256.
pub fn parse_hash(hex_str: &str) -> Result<Hash256, ErrorObjectOwned> {
    hex_str
        .parse()
        .map_err(|e| rpc_error(-8, &format!("invalid hash: {e}")))
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

/// Numeric code for an error.
pub fn error_code(e: &StrataError) -> i32 {
    match e {
        StrataError::BlockIndex(BlockIndexError::NotFound(_))
        | StrataError::Digest(DigestError::UnknownBestBlock(_)) => -5,
        StrataError::BlockIndex(BlockIndexError::StateInvalid)
        | StrataError::Digest(DigestError::AmountOverflow { .. }) => -20,
        StrataError::BlockIndex(_)
        | StrataError::LogIndex(LogIndexError::InvalidRange(_) | LogIndexError::InvalidParameter)
        | StrataError::InvalidBlock(_) => -8,
        StrataError::LogIndex(LogIndexError::IndexDisabled)
        | StrataError::Digest(DigestError::Io(_))
        | StrataError::Storage(_) => -1,
    }
}

fn to_rpc(e: StrataError) -> ErrorObjectOwned {
    rpc_error(error_code(&e), &e.to_string())
}

/// The Strata JSON-RPC interface.
#[rpc(server)]
pub trait StrataRpc {
    /// Height of the active tip.
    #[method(name = "getblockcount")]
    async fn get_block_count(&self) -> Result<u64, ErrorObjectOwned>;

    /// Hash of the active tip.
    #[method(name = "getbestblockhash")]
    async fn get_best_block_hash(&self) -> Result<String, ErrorObjectOwned>;

    /// Every known branch tip with its status.
    #[method(name = "getchaintips")]
    async fn get_chain_tips(&self) -> Result<Vec<ChainTipJson>, ErrorObjectOwned>;

    /// Statistics and digest of the unspent output set.
    #[method(name = "gettxoutsetinfo")]
    async fn get_txout_set_info(&self) -> Result<TxOutSetInfoJson, ErrorObjectOwned>;

    /// Receipts with logs in a block range.
    #[method(name = "searchlogs")]
    async fn search_logs(
        &self,
        from: BlockHeightArg,
        to: BlockHeightArg,
        filter: Option<LogFilter>,
        minconf: Option<u64>,
    ) -> Result<Vec<Receipt>, ErrorObjectOwned>;

    /// Block until matching logs are confirmed.
    ///
    /// A client that goes away cancels the wait by dropping the request;
    /// node shutdown releases every pending wait with an error.
    #[method(name = "waitforlogs")]
    async fn wait_for_logs(
        &self,
        from: Option<BlockHeightArg>,
        to: Option<WaitBound>,
        filter: Option<LogFilter>,
        minconf: Option<u64>,
    ) -> Result<WaitOutcome, ErrorObjectOwned>;

    /// Receipts recorded for a transaction.
    #[method(name = "gettransactionreceipt")]
    async fn get_transaction_receipt(&self, txid: String) -> Result<Vec<Receipt>, ErrorObjectOwned>;

    #[method(name = "invalidateblock")]
    async fn invalidate_block(&self, hash: String) -> Result<(), ErrorObjectOwned>;

    #[method(name = "reconsiderblock")]
    async fn reconsider_block(&self, hash: String) -> Result<(), ErrorObjectOwned>;
}

pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl StrataRpcServer for RpcServerImpl {
    async fn get_block_count(&self) -> Result<u64, ErrorObjectOwned> {
        Ok(self.node.tip().map_or(0, |t| t.height))
    }

    async fn get_best_block_hash(&self) -> Result<String, ErrorObjectOwned> {
        self.node
            .tip()
            .map(|t| t.hash.to_string())
            .ok_or_else(|| rpc_error(-1, "no active chain"))
    }

    async fn get_chain_tips(&self) -> Result<Vec<ChainTipJson>, ErrorObjectOwned> {
        Ok(self
            .node
            .chain_tips()
            .into_iter()
            .map(ChainTipJson::from)
            .collect())
    }

    async fn get_txout_set_info(&self) -> Result<TxOutSetInfoJson, ErrorObjectOwned> {
        let node = Arc::clone(&self.node);
        tokio::task::spawn_blocking(move || node.utxo_digest())
            .await
            .map_err(|e| rpc_error(-1, &e.to_string()))?
            .map(TxOutSetInfoJson::from)
            .map_err(to_rpc)
    }

    async fn search_logs(
        &self,
        from: BlockHeightArg,
        to: BlockHeightArg,
        filter: Option<LogFilter>,
        minconf: Option<u64>,
    ) -> Result<Vec<Receipt>, ErrorObjectOwned> {
        let mut params = SearchParams::new(from, to);
        params.filter = filter.unwrap_or_default();
        if let Some(minconf) = minconf {
            params.minconf = minconf;
        }
        self.node.search_logs(&params).map_err(to_rpc)
    }

    async fn wait_for_logs(
        &self,
        from: Option<BlockHeightArg>,
        to: Option<WaitBound>,
        filter: Option<LogFilter>,
        minconf: Option<u64>,
    ) -> Result<WaitOutcome, ErrorObjectOwned> {
        let params = WaitParams {
            from,
            to: to.and_then(|bound| bound.0),
            minconf,
            filter: filter.unwrap_or_default(),
        };
        self.node
            .wait_for_logs(&params)
            .await
            .map_err(to_rpc)?
            .ok_or_else(|| rpc_error(-1, "node is shutting down"))
    }

    async fn get_transaction_receipt(&self, txid: String) -> Result<Vec<Receipt>, ErrorObjectOwned> {
        let hash = parse_hash(&txid)?;
        self.node.transaction_receipts(&hash).map_err(to_rpc)
    }

    async fn invalidate_block(&self, hash: String) -> Result<(), ErrorObjectOwned> {
        let hash = parse_hash(&hash)?;
        self.node.invalidate_block(&hash).map(|_| ()).map_err(to_rpc)
    }

    async fn reconsider_block(&self, hash: String) -> Result<(), ErrorObjectOwned> {
        let hash = parse_hash(&hash)?;
        self.node.reconsider_block(&hash).map(|_| ()).map_err(to_rpc)
    }
}

/// Start the JSON-RPC server on `addr`, returning the bound address.
pub async fn start_rpc_server(
    addr: &str,
    node: Arc<Node>,
) -> Result<(SocketAddr, ServerHandle), StrataError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| StrataError::Storage(format!("RPC server error: {e}")))?;
    let local = server
        .local_addr()
        .map_err(|e| StrataError::Storage(format!("RPC server error: {e}")))?;

    let handle = server.start(RpcServerImpl::new(node).into_rpc());
    info!(%local, "RPC server listening");
    Ok((local, handle))
}

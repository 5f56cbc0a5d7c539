//! Node composition.
//!
//! [`Node`] owns the block index behind one `RwLock` and keeps three things
//! in step with it: the coin set, the persisted block records, and the log
//! index. Every change of the active chain is replayed from its
//! [`ReorgPlan`] while the write lock is held, so a reader holding the read
//! lock sees the chain and the log index either both before or both after
//! the change.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use strata_core::block_index::{BlockIndex, BlockValidity, ChainTipInfo, NodeId, ReorgPlan};
use strata_core::digest::{DigestEngine, UtxoDigestResult};
use strata_core::error::{BlockIndexError, DigestError, StrataError};
use strata_core::selection::{self, MostWorkSelector};
use strata_core::traits::{ChainSelector, LogIndexStore, ReceiptStore, UtxoSnapshot};
use strata_core::types::{ChainTip, Hash256, Receipt};
use strata_index::{LogIndex, SearchParams, TipNotifier, WaitOutcome, WaitParams};

use crate::config::NodeConfig;
use crate::storage::{BlockBody, RocksStore};

pub struct Node {
    chain: RwLock<BlockIndex>,
    store: Arc<RocksStore>,
    log_index: LogIndex,
    selector: Box<dyn ChainSelector>,
    digest: DigestEngine,
    running: AtomicBool,
    config: NodeConfig,
}

impl Node {
    /// Open storage and rebuild the block index with the default selector.
    pub fn open(config: NodeConfig) -> Result<Arc<Self>, StrataError> {
        Self::open_with_selector(config, Box::new(MostWorkSelector::default()))
    }

    /// Open storage and rebuild the block index.
    ///
    /// If the log index setting changed since the last run, the index is
    /// wiped and, when now enabled, rebuilt from the stored bodies of the
    /// active chain.
    pub fn open_with_selector(
        config: NodeConfig,
        selector: Box<dyn ChainSelector>,
    ) -> Result<Arc<Self>, StrataError> {
        let store = Arc::new(RocksStore::open(config.db_path())?);
        let index = BlockIndex::restore(store.load_block_records()?, store.active_tip()?)?;
        let tip = index.tip().unwrap_or_default();
        info!(blocks = index.len(), height = tip.height, tip = %tip.hash, "block index loaded");

        let notifier = TipNotifier::new(tip);
        let log_store: Arc<dyn LogIndexStore> = store.clone();
        let receipt_store: Arc<dyn ReceiptStore> = store.clone();
        let log_index = LogIndex::new(log_store, receipt_store, notifier)
            .with_enabled(config.log_events)
            .with_poll_interval(config.wait_poll_interval())
            .with_default_wait_minconf(config.default_wait_minconf);

        let node = Self {
            chain: RwLock::new(index),
            store,
            log_index,
            selector,
            digest: DigestEngine::new(),
            running: AtomicBool::new(true),
            config,
        };
        node.sync_log_index_setting()?;
        Ok(Arc::new(node))
    }

    fn sync_log_index_setting(&self) -> Result<(), StrataError> {
        let enabled = self.config.log_events;
        let previous = self.store.log_events_flag()?;
        if previous == Some(enabled) {
            return Ok(());
        }
        let chain = self.chain.write();
        if previous.is_some() {
            self.log_index.wipe()?;
        }
        if enabled {
            self.reindex_logs(&chain)?;
        }
        self.store.set_log_events_flag(enabled)?;
        info!(enabled, "log index setting changed");
        Ok(())
    }

    fn reindex_logs(&self, chain: &BlockIndex) -> Result<(), StrataError> {
        let Some(height) = chain.height() else {
            return Ok(());
        };
        for h in 0..=height {
            let Some(id) = chain.active_at(h) else { break };
            let hash = chain.node(id).hash;
            let body = self.body_of(&hash)?;
            self.log_index.connect_block(h, hash, &body.receipts)?;
        }
        info!(height, "log index rebuilt");
        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RocksStore> {
        &self.store
    }

    // --- Chain mutation ---

    /// Record a header. Headers never move the active chain on their own.
    pub fn accept_header(
        &self,
        hash: Hash256,
        parent: Option<Hash256>,
        work: u128,
    ) -> Result<NodeId, StrataError> {
        let mut chain = self.chain.write();
        let id = chain.accept_header(hash, parent, work)?;
        self.store.put_block_records([&chain.record(id)])?;
        debug!(%hash, height = chain.node(id).height, "header accepted");
        Ok(id)
    }

    /// Store the body of a validated block and re-select the best chain.
    ///
    /// The header must already be known.
    pub fn accept_block(&self, hash: Hash256, body: BlockBody) -> Result<ReorgPlan, StrataError> {
        let mut chain = self.chain.write();
        let id = chain.require(&hash)?;
        self.store.put_block_body(&hash, &body)?;
        chain.mark_data(id, body.tx_count);
        chain.raise_validity(id, BlockValidity::Scripts);
        self.store.put_block_records([&chain.record(id)])?;
        self.activate(&mut chain)
    }

    /// Mark a block and its descendants invalid and move off them.
    pub fn invalidate_block(&self, hash: &Hash256) -> Result<ReorgPlan, StrataError> {
        let mut chain = self.chain.write();
        let result = selection::invalidate_block(&mut chain, self.selector.as_ref(), hash);
        self.finish_flag_change(&mut chain, result)
    }

    /// Clear failure marks set by [`invalidate_block`](Self::invalidate_block).
    pub fn reconsider_block(&self, hash: &Hash256) -> Result<ReorgPlan, StrataError> {
        let mut chain = self.chain.write();
        let result = selection::reconsider_block(&mut chain, self.selector.as_ref(), hash);
        self.finish_flag_change(&mut chain, result)
    }

    fn finish_flag_change(
        &self,
        chain: &mut BlockIndex,
        result: Result<ReorgPlan, BlockIndexError>,
    ) -> Result<ReorgPlan, StrataError> {
        if let Err(e @ BlockIndexError::NotFound(_)) = &result {
            return Err(e.clone().into());
        }
        // Flags changed even when no valid chain remains; persist them first.
        self.persist_records(chain)?;
        self.apply(chain, result?)
    }

    fn activate(&self, chain: &mut BlockIndex) -> Result<ReorgPlan, StrataError> {
        let plan = selection::activate_best_chain(chain, self.selector.as_ref())?;
        self.apply(chain, plan)
    }

    /// Replay `plan`, rolling the active chain back if a block fails.
    ///
    /// On failure the active chain is reset to the block the stores reached.
    /// A block rejected by the coin set is marked failed and selection runs
    /// again, so the chain settles on the best remaining candidate before the
    /// error is returned.
    fn apply(&self, chain: &mut BlockIndex, plan: ReorgPlan) -> Result<ReorgPlan, StrataError> {
        let mut progress = ReplayProgress::start(chain, &plan);
        let Err(e) = self.replay(chain, &plan, &mut progress) else {
            return Ok(plan);
        };
        let reached = progress.reached.and_then(|h| chain.lookup(&h));
        chain.reset_tip(reached);
        self.persist_tip(chain)?;
        warn!(reached = ?progress.reached, "chain replay failed: {e}");

        if let Some(id) = progress.rejected.and_then(|h| chain.lookup(&h)) {
            chain.mark_failed(id);
            self.persist_records(chain)?;
            match self.activate(chain) {
                Ok(_) | Err(StrataError::BlockIndex(BlockIndexError::StateInvalid)) => {}
                Err(other) => return Err(other),
            }
        }
        Err(e)
    }

    /// Bring coins, log index and the persisted tip in line with `plan`.
    fn replay(
        &self,
        chain: &BlockIndex,
        plan: &ReorgPlan,
        progress: &mut ReplayProgress,
    ) -> Result<(), StrataError> {
        if plan.is_empty() {
            return Ok(());
        }
        for (height, hash) in &plan.disconnected {
            let body = self.body_of(hash)?;
            let parent = parent_hash(chain, hash);
            self.store
                .disconnect_coins(hash, &body, &parent.unwrap_or_default())?;
            progress.reached = parent;
            self.log_index.disconnect_block(
                *height,
                ChainTip::new(height.saturating_sub(1), parent.unwrap_or_default()),
            )?;
        }
        for (height, hash) in &plan.connected {
            let body = self.body_of(hash)?;
            if let Err(e) = self.store.connect_coins(hash, &body) {
                if matches!(e, StrataError::InvalidBlock(_)) {
                    progress.rejected = Some(*hash);
                }
                return Err(e);
            }
            progress.reached = Some(*hash);
            self.log_index.connect_block(*height, *hash, &body.receipts)?;
        }
        self.persist_tip(chain)
    }

    fn persist_tip(&self, chain: &BlockIndex) -> Result<(), StrataError> {
        if let Some(tip) = chain.tip() {
            self.store.set_active_tip(&tip.hash)?;
            debug!(height = tip.height, hash = %tip.hash, "active tip updated");
        }
        Ok(())
    }

    fn persist_records(&self, chain: &BlockIndex) -> Result<(), StrataError> {
        let records: Vec<_> = chain.iter().map(|(id, _)| chain.record(id)).collect();
        self.store.put_block_records(&records)
    }

    fn body_of(&self, hash: &Hash256) -> Result<BlockBody, StrataError> {
        self.store
            .block_body(hash)?
            .ok_or_else(|| StrataError::Storage(format!("missing body for block {hash}")))
    }

    // --- Queries ---

    pub fn tip(&self) -> Option<ChainTip> {
        self.chain.read().tip()
    }

    pub fn chain_tips(&self) -> Vec<ChainTipInfo> {
        self.chain.read().chain_tips()
    }

    /// Digest of the coin set at the block it currently reflects.
    ///
    /// Reads from a storage snapshot; the chain lock is only taken to
    /// resolve the snapshot's height.
    pub fn utxo_digest(&self) -> Result<UtxoDigestResult, StrataError> {
        let snapshot = self.store.utxo_snapshot()?;
        let best = snapshot.best_block();
        let height = self
            .chain
            .read()
            .get(&best)
            .map(|n| n.height)
            .ok_or_else(|| DigestError::UnknownBestBlock(best.to_string()))?;
        self.digest.compute(&snapshot, height).map_err(|e| {
            warn!("UTXO digest failed: {e}");
            e.into()
        })
    }

    pub fn search_logs(&self, params: &SearchParams) -> Result<Vec<Receipt>, StrataError> {
        let _chain = self.chain.read();
        self.log_index.range_query(params)
    }

    /// Wait for confirmed logs. Returns `None` once the node shuts down.
    pub async fn wait_for_logs(&self, params: &WaitParams) -> Result<Option<WaitOutcome>, StrataError> {
        self.log_index.wait_for_next(params, &self.running).await
    }

    pub fn transaction_receipts(&self, tx_hash: &Hash256) -> Result<Vec<Receipt>, StrataError> {
        self.log_index.receipts_for(tx_hash)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the node: release waiters and flush storage.
    pub fn shutdown(&self) -> Result<(), StrataError> {
        self.running.store(false, Ordering::Release);
        self.store.flush()?;
        info!("node stopped");
        Ok(())
    }
}

/// How far a replay got before it stopped.
struct ReplayProgress {
    /// Block the coin set and log index currently reflect.
    reached: Option<Hash256>,
    /// Block the coin set refused to connect.
    rejected: Option<Hash256>,
}

impl ReplayProgress {
    /// Stores start at the tip the plan moves away from.
    fn start(chain: &BlockIndex, plan: &ReorgPlan) -> Self {
        let reached = match (plan.disconnected.first(), plan.connected.first()) {
            (Some((_, old_tip)), _) => Some(*old_tip),
            (None, Some((_, first))) => parent_hash(chain, first),
            (None, None) => chain.tip().map(|t| t.hash),
        };
        Self {
            reached,
            rejected: None,
        }
    }
}

fn parent_hash(chain: &BlockIndex, hash: &Hash256) -> Option<Hash256> {
    chain
        .get(hash)
        .and_then(|n| n.parent)
        .map(|p| chain.node(p).hash)
}


//! Shared helpers for the cross-crate tests.
//!
//! [`SimChain`] is an in-memory stand-in for the node: a block index, a coin
//! set with undo data, and a log index, all driven from the same
//! [`ReorgPlan`]s the node replays.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::block_index::{BlockIndex, BlockValidity, ReorgPlan};
use strata_core::digest::{DigestEngine, UtxoDigestResult};
use strata_core::error::{BlockIndexError, StrataError};
use strata_core::selection::{self, MostWorkSelector};
use strata_core::types::{Address, ChainTip, Coin, Hash256, LogEntry, OutPoint, Receipt};
use strata_core::utxo::MemoryUtxoSet;
use strata_index::{BlockHeightArg, LogIndex, SearchParams, TipNotifier};

/// Block hash for `(branch, height)`. Distinct inputs give distinct hashes.
pub fn block_hash(branch: u8, height: u64) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xB0;
    bytes[1] = branch;
    bytes[2..10].copy_from_slice(&height.to_be_bytes());
    Hash256(bytes)
}

/// Transaction hash for the `n`th transaction of `block`.
pub fn tx_hash(block: &Hash256, n: u8) -> Hash256 {
    let mut bytes = block.0;
    bytes[0] = 0x7A;
    bytes[31] = n;
    Hash256(bytes)
}

pub fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

pub fn topic(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Receipt for a call to `contract` emitting one log with `topics`.
pub fn contract_receipt(
    block: Hash256,
    height: u64,
    tx: Hash256,
    contract: Address,
    topics: Vec<Hash256>,
) -> Receipt {
    Receipt {
        block_hash: block,
        block_number: height,
        transaction_hash: tx,
        transaction_index: 0,
        from: addr(0x01),
        to: contract,
        contract_address: contract,
        cumulative_gas_used: 21_000,
        gas_used: 21_000,
        status: 0,
        logs: vec![LogEntry {
            address: contract,
            topics,
            data: height.to_be_bytes().to_vec(),
        }],
    }
}

/// Contents of one simulated block.
#[derive(Clone, Debug, Default)]
pub struct SimBlock {
    pub receipts: Vec<Receipt>,
    pub created: Vec<(OutPoint, Coin)>,
    pub spent: Vec<OutPoint>,
}

impl SimBlock {
    /// One coinbase output and one contract receipt, both keyed off `hash`.
    pub fn standard(hash: Hash256, height: u64, contract: Address) -> Self {
        let tx = tx_hash(&hash, 0);
        Self {
            receipts: vec![contract_receipt(hash, height, tx, contract, vec![topic(0xE0)])],
            created: vec![(
                OutPoint::new(tx, 0),
                Coin {
                    script: vec![0x51, hash.0[1]],
                    value: 50 + height,
                    height,
                    is_coinbase: true,
                },
            )],
            spent: Vec::new(),
        }
    }
}

/// In-memory chain with coins and a log index kept in step with the tip.
pub struct SimChain {
    pub index: BlockIndex,
    pub coins: MemoryUtxoSet,
    pub log_index: Arc<LogIndex>,
    selector: MostWorkSelector,
    blocks: HashMap<Hash256, SimBlock>,
    undo: HashMap<Hash256, Vec<(OutPoint, Coin)>>,
}

impl Default for SimChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChain {
    pub fn new() -> Self {
        Self {
            index: BlockIndex::new(),
            coins: MemoryUtxoSet::default(),
            log_index: Arc::new(LogIndex::in_memory(TipNotifier::default())),
            selector: MostWorkSelector::default(),
            blocks: HashMap::new(),
            undo: HashMap::new(),
        }
    }

    /// Add a fully validated block and activate the best chain.
    pub fn add_block(
        &mut self,
        hash: Hash256,
        parent: Option<Hash256>,
        work: u128,
        block: SimBlock,
    ) -> Result<ReorgPlan, StrataError> {
        let id = self.index.accept_header(hash, parent, work)?;
        self.index.mark_data(id, block.receipts.len().max(1) as u64);
        self.index.raise_validity(id, BlockValidity::Scripts);
        self.blocks.insert(hash, block);
        self.activate()
    }

    /// Add a standard block on `parent` and return its hash.
    pub fn extend(
        &mut self,
        branch: u8,
        parent: Option<Hash256>,
        work: u128,
    ) -> Result<Hash256, StrataError> {
        let height = match parent {
            Some(p) => self.index.get(&p).map_or(0, |n| n.height + 1),
            None => 0,
        };
        let hash = block_hash(branch, height);
        self.add_block(hash, parent, work, SimBlock::standard(hash, height, addr(0xC0)))?;
        Ok(hash)
    }

    pub fn header_only(&mut self, hash: Hash256, parent: Hash256) -> Result<(), StrataError> {
        self.index.accept_header(hash, Some(parent), 1)?;
        Ok(())
    }

    pub fn invalidate(&mut self, hash: &Hash256) -> Result<ReorgPlan, StrataError> {
        let plan = selection::invalidate_block(&mut self.index, &self.selector, hash)?;
        self.apply(plan)
    }

    pub fn reconsider(&mut self, hash: &Hash256) -> Result<ReorgPlan, StrataError> {
        let plan = selection::reconsider_block(&mut self.index, &self.selector, hash)?;
        self.apply(plan)
    }

    fn activate(&mut self) -> Result<ReorgPlan, StrataError> {
        let plan = selection::activate_best_chain(&mut self.index, &self.selector)?;
        self.apply(plan)
    }

    /// Replay `plan`; on a rejected block, rewind to what the coins reached,
    /// mark the block failed and select again.
    fn apply(&mut self, plan: ReorgPlan) -> Result<ReorgPlan, StrataError> {
        let mut reached = match (plan.disconnected.first(), plan.connected.first()) {
            (Some((_, old_tip)), _) => Some(*old_tip),
            (None, Some((_, first))) => self.parent_of(first),
            (None, None) => return Ok(plan),
        };
        let mut rejected = None;
        let Err(e) = self.replay(&plan, &mut reached, &mut rejected) else {
            return Ok(plan);
        };
        let reached = reached.and_then(|h| self.index.lookup(&h));
        self.index.reset_tip(reached);
        if let Some(id) = rejected.and_then(|h| self.index.lookup(&h)) {
            self.index.mark_failed(id);
            match self.activate() {
                Ok(_) | Err(StrataError::BlockIndex(BlockIndexError::StateInvalid)) => {}
                Err(other) => return Err(other),
            }
        }
        Err(e)
    }

    fn replay(
        &mut self,
        plan: &ReorgPlan,
        reached: &mut Option<Hash256>,
        rejected: &mut Option<Hash256>,
    ) -> Result<(), StrataError> {
        for (height, hash) in &plan.disconnected {
            let block = self.block(hash)?;
            for (outpoint, _) in &block.created {
                self.coins.spend(outpoint);
            }
            for (outpoint, coin) in self.undo.remove(hash).unwrap_or_default() {
                self.coins.add_coin(outpoint, coin);
            }
            let parent = self.parent_of(hash);
            self.coins.set_best_block(parent.unwrap_or_default());
            *reached = parent;
            self.log_index
                .disconnect_block(*height, ChainTip::new(height.saturating_sub(1), parent.unwrap_or_default()))?;
        }
        for (height, hash) in &plan.connected {
            let block = self.block(hash)?;
            let mut undo = Vec::with_capacity(block.spent.len());
            for outpoint in &block.spent {
                let Some(coin) = self.coins.spend(outpoint) else {
                    // Put back what this block already spent.
                    for (op, coin) in undo {
                        self.coins.add_coin(op, coin);
                    }
                    *rejected = Some(*hash);
                    return Err(StrataError::InvalidBlock(format!("{hash} spends missing {outpoint}")));
                };
                undo.push((*outpoint, coin));
            }
            for (outpoint, coin) in &block.created {
                self.coins.add_coin(*outpoint, coin.clone());
            }
            self.undo.insert(*hash, undo);
            self.coins.set_best_block(*hash);
            *reached = Some(*hash);
            self.log_index.connect_block(*height, *hash, &block.receipts)?;
        }
        Ok(())
    }

    fn parent_of(&self, hash: &Hash256) -> Option<Hash256> {
        self.index
            .get(hash)
            .and_then(|n| n.parent)
            .map(|p| self.index.node(p).hash)
    }

    fn block(&self, hash: &Hash256) -> Result<SimBlock, StrataError> {
        self.blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| StrataError::Storage(format!("missing block {hash}")))
    }

    /// Hashes of the active chain, genesis first.
    pub fn active_chain(&self) -> Vec<Hash256> {
        let Some(height) = self.index.height() else {
            return Vec::new();
        };
        (0..=height)
            .filter_map(|h| self.index.active_at(h))
            .map(|id| self.index.node(id).hash)
            .collect()
    }

    /// Coin set rebuilt from scratch by connecting the active chain in order.
    pub fn rebuilt_coins(&self) -> Result<MemoryUtxoSet, StrataError> {
        let mut coins = MemoryUtxoSet::default();
        for hash in self.active_chain() {
            let block = self.block(&hash)?;
            for outpoint in &block.spent {
                coins.spend(outpoint);
            }
            for (outpoint, coin) in block.created {
                coins.add_coin(outpoint, coin);
            }
            coins.set_best_block(hash);
        }
        Ok(coins)
    }

    pub fn digest(&self) -> Result<UtxoDigestResult, StrataError> {
        Ok(DigestEngine::new().compute(&self.coins, self.index.height().unwrap_or(0))?)
    }

    /// Transactions returned by an unfiltered search of the whole chain.
    pub fn search_all(&self) -> Result<Vec<Hash256>, StrataError> {
        let params = SearchParams::new(BlockHeightArg::Number(0), BlockHeightArg::Latest);
        Ok(self
            .log_index
            .range_query(&params)?
            .into_iter()
            .map(|r| r.transaction_hash)
            .collect())
    }

    /// Transactions of every receipt on the active chain, in height order.
    pub fn expected_logs(&self) -> Vec<Hash256> {
        self.active_chain()
            .iter()
            .filter_map(|hash| self.blocks.get(hash))
            .flat_map(|b| b.receipts.iter().filter(|r| !r.logs.is_empty()))
            .map(|r| r.transaction_hash)
            .collect()
    }
}

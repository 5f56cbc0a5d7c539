//! In-memory block index: an arena forest of block metadata plus the active
//! chain, and the tip classifier built on top of it.
//!
//! Nodes are addressed by [`NodeId`] (their arena slot) and never removed.
//! Parent links are ids, so the forest has no ownership cycles and flag
//! updates never touch ownership. The active chain is a separate
//! height-indexed table of ids.
//!
//! The index performs no consensus checks. Callers (the consensus engine)
//! decide validity and call [`BlockIndex::raise_validity`],
//! [`BlockIndex::mark_data`], and [`BlockIndex::set_tip`].

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BlockIndexError;
use crate::types::{ChainTip, Hash256};

/// Stable arena slot of a block in a [`BlockIndex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How far a block has been validated. Levels are cumulative.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub enum BlockValidity {
    #[default]
    Unknown,
    /// Header parsed and proof-of-work checked.
    Header,
    /// Header chain is correct: parent known and contextual checks passed.
    Tree,
    /// Transactions checked in isolation.
    Transactions,
    /// Fully executed against its parent's state.
    Scripts,
}

/// Validity and availability flags of one block.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockStatus {
    pub validity: BlockValidity,
    /// Full block body is stored.
    pub have_data: bool,
    /// This block itself failed validation or was invalidated.
    pub failed: bool,
    /// Some ancestor failed.
    pub failed_child: bool,
}

impl BlockStatus {
    /// True if this block or an ancestor is marked failed.
    pub fn is_failed(&self) -> bool {
        self.failed || self.failed_child
    }

    /// True if the block is not failed and reached at least `level`.
    pub fn is_valid(&self, level: BlockValidity) -> bool {
        !self.is_failed() && self.validity >= level
    }
}

/// Metadata for one known block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockNode {
    pub hash: Hash256,
    pub height: u64,
    pub parent: Option<NodeId>,
    pub status: BlockStatus,
    /// Transactions in this block; zero until the body is received.
    pub tx_count: u64,
    /// Transactions on the branch up to and including this block. Zero when
    /// this block or any ancestor lacks full data.
    pub chain_tx: u64,
    /// Own proof-of-work contribution.
    pub work: u128,
    /// Cumulative work up to and including this block.
    pub chain_work: u128,
    /// Order in which the header was first learned.
    pub sequence: u64,
}

/// Position of a block relative to the active chain.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChainTipStatus {
    /// Part of the active chain.
    Active,
    /// This block or an ancestor is invalid.
    Invalid,
    /// Full data for this block or an ancestor is missing.
    HeadersOnly,
    /// Fully validated but not on the active chain.
    ValidFork,
    /// Header chain valid; body never fully validated.
    ValidHeaders,
    Unknown,
}

impl ChainTipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Invalid => "invalid",
            Self::HeadersOnly => "headers-only",
            Self::ValidFork => "valid-fork",
            Self::ValidHeaders => "valid-headers",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChainTipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of [`BlockIndex::chain_tips`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChainTipInfo {
    pub height: u64,
    pub hash: Hash256,
    /// Zero for the active tip; otherwise the distance to the fork point.
    pub branch_len: u64,
    pub status: ChainTipStatus,
}

/// The suffix swap performed by [`BlockIndex::set_tip`].
///
/// `disconnected` is ordered highest first and `connected` lowest first,
/// which is the order secondary indexes must replay them in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReorgPlan {
    /// Height of the last block shared by the old and new chains.
    pub fork_height: Option<u64>,
    pub disconnected: Vec<(u64, Hash256)>,
    pub connected: Vec<(u64, Hash256)>,
}

impl ReorgPlan {
    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty() && self.connected.is_empty()
    }
}

/// Persistable form of a [`BlockNode`]; parent is a hash instead of an id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockRecord {
    pub hash: Hash256,
    pub parent: Option<Hash256>,
    pub height: u64,
    pub status: BlockStatus,
    pub tx_count: u64,
    pub work: u128,
    pub sequence: u64,
}

/// Arena forest of known blocks and the active chain.
#[derive(Debug, Default)]
pub struct BlockIndex {
    nodes: Vec<BlockNode>,
    children: Vec<Vec<NodeId>>,
    by_hash: HashMap<Hash256, NodeId>,
    /// Active chain, genesis first. `active[h]` is the block at height `h`.
    active: Vec<NodeId>,
    next_sequence: u64,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &BlockNode {
        &self.nodes[id.index()]
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockNode> {
        self.lookup(hash).map(|id| self.node(id))
    }

    /// Like [`lookup`](Self::lookup) but fails with `NotFound`.
    pub fn require(&self, hash: &Hash256) -> Result<NodeId, BlockIndexError> {
        self.lookup(hash)
            .ok_or_else(|| BlockIndexError::NotFound(hash.to_string()))
    }

    /// Iterate all nodes with their ids, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BlockNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id.index()]
    }

    // ------------------------------------------------------------------
    // Header / body bookkeeping
    // ------------------------------------------------------------------

    /// Record a newly learned header.
    ///
    /// `parent` is `None` only for genesis, which must be the first block.
    /// Re-accepting a known hash returns its existing id.
    pub fn accept_header(
        &mut self,
        hash: Hash256,
        parent: Option<Hash256>,
        work: u128,
    ) -> Result<NodeId, BlockIndexError> {
        if let Some(id) = self.lookup(&hash) {
            return Ok(id);
        }
        let parent_id = match parent {
            Some(p) => Some(self.lookup(&p).ok_or_else(|| BlockIndexError::UnknownParent {
                block: hash.to_string(),
                parent: p.to_string(),
            })?),
            None if self.nodes.is_empty() => None,
            None => return Err(BlockIndexError::DuplicateBlock(format!("second genesis {hash}"))),
        };
        let (height, parent_work, parent_failed) = match parent_id {
            Some(p) => {
                let pn = self.node(p);
                (pn.height + 1, pn.chain_work, pn.status.is_failed())
            }
            None => (0, 0, false),
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = self.push(BlockNode {
            hash,
            height,
            parent: parent_id,
            status: BlockStatus {
                validity: BlockValidity::Tree,
                failed_child: parent_failed,
                ..BlockStatus::default()
            },
            tx_count: 0,
            chain_tx: 0,
            work,
            chain_work: parent_work.saturating_add(work),
            sequence,
        });
        Ok(id)
    }

    fn push(&mut self, node: BlockNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        if let Some(p) = node.parent {
            self.children[p.index()].push(id);
        }
        self.by_hash.insert(node.hash, id);
        self.nodes.push(node);
        self.children.push(Vec::new());
        id
    }

    /// Record that the full body of a block is stored.
    ///
    /// Updates `chain_tx` for the block and for every descendant whose
    /// branch becomes fully available as a result.
    pub fn mark_data(&mut self, id: NodeId, tx_count: u64) {
        let node = &mut self.nodes[id.index()];
        node.status.have_data = true;
        node.tx_count = tx_count;
        self.propagate_chain_tx(id);
    }

    fn propagate_chain_tx(&mut self, start: NodeId) {
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id.index()];
            if !node.status.have_data {
                continue;
            }
            let base = match node.parent {
                None => Some(0),
                Some(p) => {
                    let pc = self.nodes[p.index()].chain_tx;
                    (pc > 0).then_some(pc)
                }
            };
            let Some(base) = base else { continue };
            let node = &mut self.nodes[id.index()];
            node.chain_tx = base + node.tx_count.max(1);
            queue.extend(self.children[id.index()].iter().copied());
        }
    }

    /// Raise a block's validity level. Never lowers it.
    pub fn raise_validity(&mut self, id: NodeId, level: BlockValidity) {
        let status = &mut self.nodes[id.index()].status;
        if level > status.validity {
            status.validity = level;
        }
    }

    // ------------------------------------------------------------------
    // Active chain
    // ------------------------------------------------------------------

    pub fn tip_id(&self) -> Option<NodeId> {
        self.active.last().copied()
    }

    pub fn tip(&self) -> Option<ChainTip> {
        self.tip_id().map(|id| {
            let n = self.node(id);
            ChainTip::new(n.height, n.hash)
        })
    }

    /// Height of the active tip, `None` when no chain is active.
    pub fn height(&self) -> Option<u64> {
        self.tip().map(|t| t.height)
    }

    /// Block on the active chain at `height`.
    pub fn active_at(&self, height: u64) -> Option<NodeId> {
        usize::try_from(height)
            .ok()
            .and_then(|h| self.active.get(h).copied())
    }

    /// Whether `id` is part of the active chain.
    pub fn contains(&self, id: NodeId) -> bool {
        self.active_at(self.node(id).height) == Some(id)
    }

    /// Ancestor of `id` at `height` (the node itself when heights match).
    pub fn ancestor(&self, id: NodeId, height: u64) -> Option<NodeId> {
        let mut cur = id;
        loop {
            let node = self.node(cur);
            if node.height == height {
                return Some(cur);
            }
            if node.height < height {
                return None;
            }
            cur = node.parent?;
        }
    }

    /// Walk from `id` back to genesis, starting with `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |cur| self.node(*cur).parent)
    }

    /// Lowest ancestor of `id` (possibly itself) on the active chain.
    pub fn find_fork(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).find(|a| self.contains(*a))
    }

    /// Make `new_tip` the active tip, replacing the diverging suffix.
    ///
    /// The swap happens under `&mut self`, so readers holding the shared side
    /// of the surrounding lock observe either the old or the new chain.
    pub fn set_tip(&mut self, new_tip: NodeId) -> ReorgPlan {
        let fork = self.find_fork(new_tip);
        let keep = fork.map(|f| self.node(f).height as usize + 1).unwrap_or(0);

        let disconnected: Vec<(u64, Hash256)> = self.active[keep..]
            .iter()
            .rev()
            .map(|id| {
                let n = self.node(*id);
                (n.height, n.hash)
            })
            .collect();

        let mut path: Vec<NodeId> = self
            .ancestors(new_tip)
            .take_while(|a| Some(*a) != fork)
            .collect();
        path.reverse();
        let connected = path
            .iter()
            .map(|id| {
                let n = self.node(*id);
                (n.height, n.hash)
            })
            .collect();

        self.active.truncate(keep);
        self.active.extend(path);

        ReorgPlan {
            fork_height: fork.map(|f| self.node(f).height),
            disconnected,
            connected,
        }
    }

    /// Point the active chain at `tip` without producing a plan, or empty
    /// it with `None`.
    ///
    /// Rolls back a swap whose replay stopped partway: `tip` is the block
    /// the replayed stores actually reached.
    pub fn reset_tip(&mut self, tip: Option<NodeId>) {
        match tip {
            Some(id) => {
                self.set_tip(id);
            }
            None => self.active.clear(),
        }
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    /// Status of a block relative to the active chain.
    pub fn classify(&self, id: NodeId) -> ChainTipStatus {
        let node = self.node(id);
        if self.contains(id) {
            ChainTipStatus::Active
        } else if node.status.is_failed() {
            ChainTipStatus::Invalid
        } else if node.chain_tx == 0 {
            ChainTipStatus::HeadersOnly
        } else if node.status.is_valid(BlockValidity::Scripts) {
            ChainTipStatus::ValidFork
        } else if node.status.is_valid(BlockValidity::Tree) {
            ChainTipStatus::ValidHeaders
        } else {
            ChainTipStatus::Unknown
        }
    }

    /// `height - height(find_fork)`; zero on the active chain.
    pub fn branch_len(&self, id: NodeId) -> u64 {
        let height = self.node(id).height;
        match self.find_fork(id) {
            Some(f) => height - self.node(f).height,
            None => height + 1,
        }
    }

    /// All known tips: blocks without children, plus the active tip.
    ///
    /// Sorted by descending height; equal heights are ordered by arena id,
    /// i.e. the order headers were learned. That order is stable within one
    /// process but two nodes that learned headers in a different order may
    /// list equal-height tips differently.
    pub fn chain_tips(&self) -> Vec<ChainTipInfo> {
        let mut tips: Vec<NodeId> = self
            .iter()
            .filter(|(id, _)| self.children(*id).is_empty())
            .map(|(id, _)| id)
            .collect();
        if let Some(tip) = self.tip_id() {
            if !tips.contains(&tip) {
                tips.push(tip);
            }
        }
        tips.sort_by(|a, b| {
            self.node(*b)
                .height
                .cmp(&self.node(*a).height)
                .then(a.cmp(b))
        });
        tips.into_iter()
            .map(|id| {
                let n = self.node(id);
                ChainTipInfo {
                    height: n.height,
                    hash: n.hash,
                    branch_len: self.branch_len(id),
                    status: self.classify(id),
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Failure flags
    // ------------------------------------------------------------------

    /// Mark `id` failed and every descendant as descending from a failure.
    pub fn mark_failed(&mut self, id: NodeId) {
        self.nodes[id.index()].status.failed = true;
        let mut queue: VecDeque<NodeId> = self.children[id.index()].iter().copied().collect();
        while let Some(c) = queue.pop_front() {
            self.nodes[c.index()].status.failed_child = true;
            queue.extend(self.children[c.index()].iter().copied());
        }
    }

    /// Clear failure flags on `id` and all its ancestors, then recompute the
    /// inherited flag for its descendants.
    ///
    /// Descendants keep their own `failed` mark; only the `failed_child`
    /// flag that was derived from this branch is re-evaluated.
    pub fn clear_failure(&mut self, id: NodeId) {
        let path: Vec<NodeId> = self.ancestors(id).collect();
        for a in path {
            let status = &mut self.nodes[a.index()].status;
            status.failed = false;
            status.failed_child = false;
        }
        let mut queue: VecDeque<NodeId> = self.children[id.index()].iter().copied().collect();
        while let Some(c) = queue.pop_front() {
            let inherited = self.nodes[c.index()]
                .parent
                .map(|p| self.nodes[p.index()].status.is_failed())
                .unwrap_or(false);
            self.nodes[c.index()].status.failed_child = inherited;
            queue.extend(self.children[c.index()].iter().copied());
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn record(&self, id: NodeId) -> BlockRecord {
        let n = self.node(id);
        BlockRecord {
            hash: n.hash,
            parent: n.parent.map(|p| self.node(p).hash),
            height: n.height,
            status: n.status,
            tx_count: n.tx_count,
            work: n.work,
            sequence: n.sequence,
        }
    }

    /// Rebuild an index from persisted records and the stored active tip.
    ///
    /// Records may arrive in any order; parents are linked by height.
    pub fn restore(
        mut records: Vec<BlockRecord>,
        active_tip: Option<Hash256>,
    ) -> Result<Self, BlockIndexError> {
        records.sort_by_key(|r| (r.height, r.sequence));
        let mut index = Self::new();
        for r in records {
            let parent = match r.parent {
                Some(p) => Some(index.lookup(&p).ok_or_else(|| BlockIndexError::UnknownParent {
                    block: r.hash.to_string(),
                    parent: p.to_string(),
                })?),
                None => None,
            };
            let parent_work = parent.map(|p| index.node(p).chain_work).unwrap_or(0);
            index.next_sequence = index.next_sequence.max(r.sequence + 1);
            let id = index.push(BlockNode {
                hash: r.hash,
                height: r.height,
                parent,
                status: r.status,
                tx_count: r.tx_count,
                chain_tx: 0,
                work: r.work,
                chain_work: parent_work.saturating_add(r.work),
                sequence: r.sequence,
            });
            if r.status.have_data {
                index.propagate_chain_tx(id);
            }
        }
        if let Some(tip) = active_tip {
            let id = index.require(&tip)?;
            index.set_tip(id);
        }
        Ok(index)
    }
}

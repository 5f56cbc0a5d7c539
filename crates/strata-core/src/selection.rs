//! Best-chain selection and the invalidate / reconsider operations.
//!
//! Flag changes are applied to the [`BlockIndex`], then the configured
//! [`ChainSelector`] picks the new best tip and the index swaps its active
//! suffix. The returned [`ReorgPlan`] must be replayed against every
//! secondary index (the log index in particular) by the caller, while it
//! still holds the chain-state write lock.

use tracing::{info, warn};

use crate::block_index::{BlockIndex, BlockValidity, NodeId, ReorgPlan};
use crate::error::BlockIndexError;
use crate::traits::ChainSelector;
use crate::types::Hash256;

/// Picks the candidate with the most cumulative work.
///
/// Candidates are blocks that are not failed, have their whole branch
/// available (`chain_tx > 0`), and reached at least `min_validity`. Equal
/// work goes to the block whose header was seen first.
#[derive(Debug, Clone, Copy)]
pub struct MostWorkSelector {
    pub min_validity: BlockValidity,
}

impl Default for MostWorkSelector {
    fn default() -> Self {
        Self {
            min_validity: BlockValidity::Transactions,
        }
    }
}

impl ChainSelector for MostWorkSelector {
    fn select_best(&self, index: &BlockIndex) -> Option<NodeId> {
        index
            .iter()
            .filter(|(_, n)| n.chain_tx > 0 && n.status.is_valid(self.min_validity))
            .max_by(|(_, a), (_, b)| {
                a.chain_work
                    .cmp(&b.chain_work)
                    .then(b.sequence.cmp(&a.sequence))
            })
            .map(|(id, _)| id)
    }
}

/// Re-run selection and move the active chain to the selected tip.
///
/// # Errors
///
/// [`BlockIndexError::StateInvalid`] when the selector finds no valid
/// candidate at all.
pub fn activate_best_chain(
    index: &mut BlockIndex,
    selector: &dyn ChainSelector,
) -> Result<ReorgPlan, BlockIndexError> {
    let Some(best) = selector.select_best(index) else {
        warn!("no valid chain candidate remains");
        return Err(BlockIndexError::StateInvalid);
    };
    if index.tip_id() == Some(best) {
        return Ok(ReorgPlan::default());
    }
    let plan = index.set_tip(best);
    if !plan.disconnected.is_empty() {
        info!(
            fork_height = ?plan.fork_height,
            disconnected = plan.disconnected.len(),
            connected = plan.connected.len(),
            "chain reorganized"
        );
    }
    Ok(plan)
}

/// Mark a block and its descendants invalid, then re-select the best tip.
///
/// # Errors
///
/// - [`BlockIndexError::NotFound`] if the hash is unknown
/// - [`BlockIndexError::StateInvalid`] if no valid chain remains
pub fn invalidate_block(
    index: &mut BlockIndex,
    selector: &dyn ChainSelector,
    hash: &Hash256,
) -> Result<ReorgPlan, BlockIndexError> {
    let id = index.require(hash)?;
    index.mark_failed(id);
    info!(%hash, height = index.node(id).height, "block invalidated");
    activate_best_chain(index, selector)
}

/// Clear failure marks on a block and its ancestors, then re-select.
///
/// Descendants that were only marked because of this branch become
/// candidates again; descendants invalidated on their own stay invalid.
///
/// # Errors
///
/// - [`BlockIndexError::NotFound`] if the hash is unknown
/// - [`BlockIndexError::StateInvalid`] if no valid chain remains
pub fn reconsider_block(
    index: &mut BlockIndex,
    selector: &dyn ChainSelector,
    hash: &Hash256,
) -> Result<ReorgPlan, BlockIndexError> {
    let id = index.require(hash)?;
    index.clear_failure(id);
    info!(%hash, height = index.node(id).height, "block reconsidered");
    activate_best_chain(index, selector)
}

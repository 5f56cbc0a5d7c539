//! Confirmation-gated log index.
//!
//! Maps `(height, address)` to the transactions at that height that touched
//! the address, next to a receipt store keyed by transaction. The chain-state
//! owner drives [`LogIndex::connect_block`] and
//! [`LogIndex::disconnect_block`] while holding its write lock; readers only
//! ever see heights whose confirmation depth satisfies their `minconf`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use strata_core::constants::{DEFAULT_WAIT_MINCONF, WAIT_POLL_INTERVAL_MS};
use strata_core::error::{LogIndexError, StrataError};
use strata_core::traits::{LogIndexStore, ReceiptStore};
use strata_core::types::{Address, ChainTip, Hash256, HeightIndexEntry, LogEntry, Receipt};

use crate::filter::LogFilter;
use crate::memory::{MemoryLogStore, MemoryReceiptStore};
use crate::notify::{Liveness, TipNotifier};
use crate::params::{SearchParams, WaitParams};

/// Rows returned by [`LogIndex::read_height_index`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRead {
    /// Last height the scan consumed, including rows dropped by the address
    /// filter.
    pub indexed_height: u64,
    pub entries: Vec<HeightIndexEntry>,
}

/// One log delivered by the wait protocol, with its receipt context.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogMatch {
    pub block_hash: Hash256,
    pub block_number: u64,
    pub transaction_hash: Hash256,
    pub transaction_index: u32,
    pub from: Address,
    pub to: Address,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub contract_address: Address,
    pub status: u32,
    pub log: LogEntry,
}

impl LogMatch {
    fn new(receipt: &Receipt, log: &LogEntry) -> Self {
        Self {
            block_hash: receipt.block_hash,
            block_number: receipt.block_number,
            transaction_hash: receipt.transaction_hash,
            transaction_index: receipt.transaction_index,
            from: receipt.from,
            to: receipt.to,
            cumulative_gas_used: receipt.cumulative_gas_used,
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
            status: receipt.status,
            log: log.clone(),
        }
    }
}

/// Result of a completed wait: matching logs and where to resume.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WaitOutcome {
    pub entries: Vec<LogMatch>,
    /// Height to pass as `from` on the next call.
    pub next_from: u64,
}

pub struct LogIndex {
    enabled: bool,
    store: Arc<dyn LogIndexStore>,
    receipts: Arc<dyn ReceiptStore>,
    notifier: TipNotifier,
    poll_interval: Duration,
    default_wait_minconf: u64,
}

impl LogIndex {
    pub fn new(
        store: Arc<dyn LogIndexStore>,
        receipts: Arc<dyn ReceiptStore>,
        notifier: TipNotifier,
    ) -> Self {
        Self {
            enabled: true,
            store,
            receipts,
            notifier,
            poll_interval: Duration::from_millis(WAIT_POLL_INTERVAL_MS),
            default_wait_minconf: DEFAULT_WAIT_MINCONF,
        }
    }

    /// Index backed by in-memory stores.
    pub fn in_memory(notifier: TipNotifier) -> Self {
        Self::new(
            Arc::new(MemoryLogStore::new()),
            Arc::new(MemoryReceiptStore::new()),
            notifier,
        )
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_wait_minconf(mut self, minconf: u64) -> Self {
        self.default_wait_minconf = minconf;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn notifier(&self) -> &TipNotifier {
        &self.notifier
    }

    pub fn tip(&self) -> ChainTip {
        self.notifier.current()
    }

    fn ensure_enabled(&self) -> Result<(), LogIndexError> {
        if self.enabled {
            Ok(())
        } else {
            Err(LogIndexError::IndexDisabled)
        }
    }

    // --- Chain hooks ---

    /// Index a newly connected block and publish it as the tip.
    ///
    /// Rows at `height` are replaced, never merged, so a block reconnected
    /// after a reorg leaves no trace of the block it replaced.
    pub fn connect_block(
        &self,
        height: u64,
        block_hash: Hash256,
        receipts: &[Receipt],
    ) -> Result<(), StrataError> {
        if self.enabled {
            let mut rows: BTreeMap<Address, Vec<Hash256>> = BTreeMap::new();
            for receipt in receipts {
                for address in receipt.touched_addresses() {
                    let txs = rows.entry(address).or_default();
                    if !txs.contains(&receipt.transaction_hash) {
                        txs.push(receipt.transaction_hash);
                    }
                }
            }
            self.receipts.put_receipts(receipts)?;
            self.store.write_height(height, &rows)?;
            debug!(height, %block_hash, addresses = rows.len(), "log index connected block");
        }
        self.notifier.publish(ChainTip::new(height, block_hash));
        Ok(())
    }

    /// Publish the rewound tip, then retract everything indexed at `height`.
    ///
    /// The tip moves first so no reader pairs the old tip with a height
    /// whose rows are already gone.
    pub fn disconnect_block(&self, height: u64, new_tip: ChainTip) -> Result<(), StrataError> {
        self.notifier.publish(new_tip);
        if self.enabled {
            self.store.erase_height(height)?;
            debug!(height, "log index disconnected block");
        }
        Ok(())
    }

    /// Publish a tip without touching the index (startup, header-only moves).
    pub fn publish_tip(&self, tip: ChainTip) {
        self.notifier.publish(tip);
    }

    /// Drop all index data.
    pub fn wipe(&self) -> Result<(), StrataError> {
        self.store.wipe()?;
        info!("log index wiped");
        Ok(())
    }

    /// Highest height holding index rows.
    pub fn indexed_tip(&self) -> Result<Option<u64>, StrataError> {
        self.store.highest_height()
    }

    // --- Queries ---

    /// Scan index rows from `from` upward.
    ///
    /// The scan stops past `to` and at the first row whose confirmation
    /// depth under `tip` is below `minconf`. Rows for addresses
    /// outside a non-empty `addresses` set are skipped but still count as
    /// scanned. Returns `None` when no row qualified.
    ///
    /// # Errors
    ///
    /// [`LogIndexError::InvalidParameter`] when `to < from` or both are zero.
    pub fn read_height_index(
        &self,
        tip: ChainTip,
        from: u64,
        to: Option<u64>,
        minconf: u64,
        addresses: &BTreeSet<Address>,
    ) -> Result<Option<IndexRead>, StrataError> {
        if to.is_some_and(|to| to < from) || (from == 0 && to == Some(0)) {
            return Err(LogIndexError::InvalidParameter.into());
        }
        let mut indexed_height = None;
        let mut entries = Vec::new();
        for entry in self.store.scan_range(from, to)? {
            if tip.confirmations(entry.height) < minconf {
                break;
            }
            indexed_height = Some(entry.height);
            if addresses.is_empty() || addresses.contains(&entry.address) {
                entries.push(entry);
            }
        }
        Ok(indexed_height.map(|indexed_height| IndexRead {
            indexed_height,
            entries,
        }))
    }

    /// Receipts with logs in `[from, to]` matching the filter, in height,
    /// address, then transaction order. Each transaction appears once.
    pub fn range_query(&self, params: &SearchParams) -> Result<Vec<Receipt>, StrataError> {
        self.ensure_enabled()?;
        let tip = self.notifier.current();
        let (from, to) = params.resolve(tip.height)?;
        let Some(read) =
            self.read_height_index(tip, from, Some(to), params.minconf, &params.filter.addresses)?
        else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tx in read.entries.iter().flat_map(|e| &e.tx_hashes) {
            if !seen.insert(*tx) {
                continue;
            }
            out.extend(
                self.receipts
                    .receipts_for(tx)?
                    .into_iter()
                    .filter(|r| params.filter.receipt_matches(r)),
            );
        }
        Ok(out)
    }

    /// Block until logs at or above the requested height are confirmed.
    ///
    /// Wakes on every tip change and at least once per poll interval, and
    /// checks `liveness` on each wake. Returns `Ok(None)` once `liveness`
    /// reports the wait should stop. A bounded wait whose upper height is
    /// already fully confirmed returns at once, empty if nothing was indexed
    /// in range.
    ///
    /// Each pass judges the scan and the bound against one tip, and a pass
    /// that raced a tip change is discarded and rescanned.
    pub async fn wait_for_next(
        &self,
        params: &WaitParams,
        liveness: &dyn Liveness,
    ) -> Result<Option<WaitOutcome>, StrataError> {
        self.ensure_enabled()?;
        let mut rx = self.notifier.subscribe();
        let tip = *rx.borrow_and_update();
        let wait = params.resolve(tip.height, self.default_wait_minconf);
        debug!(from = wait.from, to = ?wait.to, minconf = wait.minconf, "waiting for logs");

        loop {
            let tip = self.notifier.current();
            let read =
                self.read_height_index(tip, wait.from, wait.to, wait.minconf, &params.filter.addresses)?;
            if self.notifier.current() != tip {
                continue;
            }
            if let Some(read) = read {
                let entries = self.collect_logs(&read.entries, &params.filter)?;
                return Ok(Some(WaitOutcome {
                    entries,
                    next_from: read.indexed_height + 1,
                }));
            }

            if let Some(to) = wait.to {
                if tip.height >= to && tip.confirmations(to) >= wait.minconf {
                    return Ok(Some(WaitOutcome {
                        entries: Vec::new(),
                        next_from: to + 1,
                    }));
                }
            }

            if !liveness.is_alive() {
                warn!(from = wait.from, "log waiter released");
                return Ok(None);
            }

            match tokio::time::timeout(self.poll_interval, rx.changed()).await {
                Ok(Ok(())) => {
                    rx.borrow_and_update();
                }
                // Sender gone: fall back to plain polling.
                Ok(Err(_)) => tokio::time::sleep(self.poll_interval).await,
                Err(_) => {}
            }
        }
    }

    fn collect_logs(
        &self,
        entries: &[HeightIndexEntry],
        filter: &LogFilter,
    ) -> Result<Vec<LogMatch>, StrataError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tx in entries.iter().flat_map(|e| &e.tx_hashes) {
            if !seen.insert(*tx) {
                continue;
            }
            for receipt in self.receipts.receipts_for(tx)? {
                out.extend(
                    receipt
                        .logs
                        .iter()
                        .filter(|log| filter.log_matches(log))
                        .map(|log| LogMatch::new(&receipt, log)),
                );
            }
        }
        Ok(out)
    }

    /// Receipts of one transaction.
    pub fn receipts_for(&self, tx_hash: &Hash256) -> Result<Vec<Receipt>, StrataError> {
        self.ensure_enabled()?;
        self.receipts.receipts_for(tx_hash)
    }
}

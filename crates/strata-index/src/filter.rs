//! Address and topic filters for log queries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use strata_core::types::{Address, Hash256, LogEntry, Receipt};

/// Filter applied to receipts and logs.
///
/// `topics[i] == None` is a wildcard for position `i`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Restrict to these addresses; empty means all.
    #[serde(default)]
    pub addresses: BTreeSet<Address>,
    #[serde(default)]
    pub topics: Vec<Option<Hash256>>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.addresses.extend(addresses);
        self
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = Option<Hash256>>) -> Self {
        self.topics.extend(topics);
        self
    }

    pub fn accepts_address(&self, address: &Address) -> bool {
        self.addresses.is_empty() || self.addresses.contains(address)
    }

    fn has_topic_constraint(&self) -> bool {
        self.topics.iter().any(Option::is_some)
    }

    /// Receipt-level rule used by range queries.
    ///
    /// Receipts without logs never match. With a topic constraint, the
    /// receipt matches if ANY constrained position equals the topic at that
    /// position in ANY of its logs. Deployed clients depend on this loose
    /// rule, so it is kept as is; use [`log_matches`](Self::log_matches) for
    /// the strict per-log rule.
    pub fn receipt_matches(&self, receipt: &Receipt) -> bool {
        if receipt.logs.is_empty() {
            return false;
        }
        if !self.has_topic_constraint() {
            return true;
        }
        self.topics.iter().enumerate().any(|(i, want)| {
            want.is_some_and(|want| {
                receipt
                    .logs
                    .iter()
                    .any(|log| log.topics.get(i) == Some(&want))
            })
        })
    }

    /// Per-log rule used by the wait protocol: every constrained position
    /// must be present and equal.
    pub fn log_matches(&self, log: &LogEntry) -> bool {
        self.topics.iter().enumerate().all(|(i, want)| match want {
            None => true,
            Some(want) => log.topics.get(i) == Some(want),
        })
    }
}

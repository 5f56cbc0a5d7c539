//! Tip change notification and caller liveness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use strata_core::types::ChainTip;

/// Publishes the chain tip to every waiter.
///
/// Created once at node start and shared by clone. Only the latest tip is
/// kept: a waiter that misses an intermediate tip still observes the newest
/// one, which is all the wait protocol needs.
#[derive(Clone, Debug)]
pub struct TipNotifier {
    tx: Arc<watch::Sender<ChainTip>>,
}

impl TipNotifier {
    pub fn new(initial: ChainTip) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current tip and wake all subscribers.
    pub fn publish(&self, tip: ChainTip) {
        self.tx.send_replace(tip);
    }

    pub fn current(&self) -> ChainTip {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChainTip> {
        self.tx.subscribe()
    }
}

impl Default for TipNotifier {
    fn default() -> Self {
        Self::new(ChainTip::default())
    }
}

/// Cooperative check that a blocking wait should keep going.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<F> Liveness for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_alive(&self) -> bool {
        self()
    }
}

/// Alive until the flag is cleared.
impl Liveness for AtomicBool {
    fn is_alive(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Never goes away. For callers whose cancellation is dropping the future.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAlive;

impl Liveness for AlwaysAlive {
    fn is_alive(&self) -> bool {
        true
    }
}

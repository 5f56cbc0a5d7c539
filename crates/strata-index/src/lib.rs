//! Strata log index: `(height, address)` index over contract execution
//! receipts, range queries and the blocking wait-for-new-logs protocol.

pub mod filter;
pub mod log_index;
pub mod memory;
pub mod notify;
pub mod params;

pub use filter::LogFilter;
pub use log_index::{LogIndex, LogMatch, WaitOutcome};
pub use notify::{Liveness, TipNotifier};
pub use params::{BlockHeightArg, SearchParams, WaitBound, WaitParams};

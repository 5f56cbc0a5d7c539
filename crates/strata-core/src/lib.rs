//! # strata-core
//! Foundation types and traits for Strata: the block index and tip
//! classifier, chain selection, and the canonical UTXO set digest.

pub mod block_index;
pub mod constants;
pub mod digest;
pub mod error;
pub mod selection;
pub mod traits;
pub mod types;
pub mod utxo;

//! Cross-crate test suite for Strata.
//!
//! Exercises the block index, chain selection, log index and node storage
//! together under reorganizations, and the JSON-RPC surface end to end.

pub mod helpers;

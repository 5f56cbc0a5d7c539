//! Error types for Strata.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockIndexError {
    #[error("block not found: {0}")] NotFound(String),
    #[error("duplicate block: {0}")] DuplicateBlock(String),
    #[error("unknown parent {parent} for block {block}")] UnknownParent { block: String, parent: String },
    #[error("no valid chain remains after re-selection")] StateInvalid,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("unable to read value from UTXO cursor: {0}")] Io(String),
    #[error("UTXO total exceeds supply bound: {total} > {bound}")] AmountOverflow { total: u128, bound: u64 },
    #[error("snapshot best block is not in the block index: {0}")] UnknownBestBlock(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogIndexError {
    #[error("invalid block range: {0}")] InvalidRange(String),
    #[error("incorrect params")] InvalidParameter,
    #[error("events indexing disabled")] IndexDisabled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected} hex characters, got {got}")] InvalidLength { expected: usize, got: usize },
    #[error("invalid hex: {0}")] InvalidHex(String),
}

#[derive(Error, Debug)]
pub enum StrataError {
    #[error(transparent)] BlockIndex(#[from] BlockIndexError),
    #[error(transparent)] Digest(#[from] DigestError),
    #[error(transparent)] LogIndex(#[from] LogIndexError),
    #[error("invalid block: {0}")] InvalidBlock(String),
    #[error("storage: {0}")] Storage(String),
}

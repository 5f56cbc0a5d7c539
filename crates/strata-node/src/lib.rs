//! Strata node library: RocksDB storage, node composition, configuration,
//! and the JSON-RPC server.

pub mod config;
pub mod node;
pub mod rpc;
pub mod storage;

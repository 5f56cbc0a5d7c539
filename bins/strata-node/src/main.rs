//! Strata node binary.
//!
//! Opens the chain database, serves chain-state queries over JSON-RPC, and
//! shuts down cleanly on Ctrl+C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use strata_node_lib::config::NodeConfig;
use strata_node_lib::node::Node;
use strata_node_lib::rpc::start_rpc_server;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "strata-node",
    version,
    about = "Strata chain-state query node with RocksDB storage and JSON-RPC server"
)]
struct Args {
    /// Data directory for chain storage and strata.toml
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Maintain the contract log index (true/false)
    #[arg(long)]
    log_events: Option<bool>,

    /// Default confirmations required by waitforlogs
    #[arg(long)]
    wait_minconf: Option<u64>,
}

impl Args {
    /// Layer CLI flags over the file and environment configuration.
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(enabled) = self.log_events {
            config.log_events = enabled;
        }
        if let Some(minconf) = self.wait_minconf {
            config.default_wait_minconf = minconf;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_format = args.log_format.clone();
    let config = NodeConfig::load(args.data_dir.as_deref()).context("loading configuration")?;
    let config = args.apply(config);

    init_logging(&config.log_level, &log_format);

    info!("Strata node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!("log_events: {}", config.log_events);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let node = Node::open(config.clone()).context("opening node")?;
    match node.tip() {
        Some(tip) => info!("chain_tip: height={} hash={}", tip.height, tip.hash),
        None => warn!("chain database is empty"),
    }

    let (_, rpc_handle) = start_rpc_server(&config.rpc_addr(), node.clone())
        .await
        .context("starting RPC server")?;

    info!("Strata node running (Ctrl+C to stop)");
    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl+C handler")?;
    info!("shutdown signal received");

    // Release blocked waitforlogs callers before stopping the server.
    node.shutdown().context("stopping node")?;
    rpc_handle.stop().ok();
    rpc_handle.stopped().await;
    info!("Strata node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured output; anything else gives human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

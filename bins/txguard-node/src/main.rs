//! txguard service binary.
//!
//! Opens the access-control store, builds the request guard over it, and
//! serves the admin and guard JSON-RPC interface until interrupted.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use txguard_node_lib::{start_rpc_server, Node, NodeConfig};

/// txguard: abuse mitigation and access control for transaction gateways.
#[derive(Parser, Debug)]
#[command(
    name = "txguard-node",
    version,
    about = "Access-control list and request guard with a JSON-RPC interface"
)]
struct Args {
    /// TOML configuration file, overlaid by TXGUARD_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the access-control database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep the access-control list in memory only
    #[arg(long)]
    ephemeral: bool,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Resolve client IPs from proxy headers (cf-connecting-ip, x-forwarded-for)
    #[arg(long)]
    trust_proxy_headers: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Apply CLI overrides on top of the loaded configuration.
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if self.ephemeral {
            config.ephemeral = true;
        }
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if self.trust_proxy_headers {
            config.guard.trust_proxy_headers = true;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let config = args.apply(config);

    init_logging(&config.log_level, &config.log_format);

    info!("txguard node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("ephemeral: {}", config.ephemeral);
    info!("rpc_addr: {}", config.rpc_addr());
    info!(
        association_threshold = config.guard.association_threshold,
        tx_interval_secs = config.guard.tx_interval_secs,
        manage_duration_secs = config.guard.manage_duration_secs,
        ip_ban_threshold_count = config.guard.ip_ban_threshold_count,
        trust_proxy_headers = config.guard.trust_proxy_headers,
        "guard policy"
    );

    let node = Node::open(config.clone()).context("failed to start node")?;
    info!("node initialized");

    let rpc_handle = start_rpc_server(&config.rpc_addr(), node.clone())
        .await
        .context("failed to start RPC server")?;
    info!("RPC server listening on {}", config.rpc_addr());
    info!("txguard node running (Ctrl+C to stop)");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            info!("received Ctrl+C, shutting down...");
        }
        _ = rpc_handle.clone().stopped() => {
            info!("RPC server exited");
        }
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");
    info!("txguard node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

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

//! txguard-cli — administrative client for a running txguard node.
//!
//! Every subcommand is one JSON-RPC call; results are printed as JSON.

use std::net::IpAddr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tracing::debug;
use txguard_core::address::Address;
use txguard_core::constants::DEFAULT_ACL_RPC_PORT;

/// txguard administrative client.
#[derive(Parser)]
#[command(name = "txguard-cli")]
#[command(version, about = "Manage access control and abuse policy on a txguard node")]
struct Cli {
    /// RPC endpoint URL.
    #[arg(short, long, global = true, default_value_t = default_endpoint())]
    rpc_endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Access-control list subcommands.
    Acl {
        #[command(subcommand)]
        action: AclAction,
    },
    /// Sybil tracking status of an address.
    Agent(AddressArg),
    /// Return an address to clean and lift its staging ban.
    Release(AddressArg),
    /// List banned IPs.
    Bans,
    /// Lift an IP ban.
    Unban(IpArg),
    /// Aggregate guard state.
    Info,
}

#[derive(Subcommand)]
enum AclAction {
    /// Deny an address.
    Deny(AddressArg),
    /// Clear a denial.
    Allow(AddressArg),
    /// Whitelist an address.
    Whitelist(AddressArg),
    /// Clear a whitelist entry.
    Unwhitelist(AddressArg),
    /// Show the access state of an address.
    Get(AddressArg),
    /// List addresses with an access-control entry.
    List(ListArgs),
}

#[derive(Args)]
struct AddressArg {
    /// Address, 0x-prefixed hex.
    address: Address,
}

#[derive(Args)]
struct IpArg {
    ip: IpAddr,
}

#[derive(Args)]
struct ListArgs {
    /// Entries to skip.
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Maximum entries to return.
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

fn default_endpoint() -> String {
    format!("http://127.0.0.1:{DEFAULT_ACL_RPC_PORT}")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = HttpClientBuilder::default()
        .build(&cli.rpc_endpoint)
        .context("failed to create RPC client")?;

    let (method, params) = match cli.command {
        Commands::Acl { action } => match action {
            AclAction::Deny(a) => ("denyaccess", address_params(&a.address)?),
            AclAction::Allow(a) => ("allowaccess", address_params(&a.address)?),
            AclAction::Whitelist(a) => ("allowwhitelist", address_params(&a.address)?),
            AclAction::Unwhitelist(a) => ("denywhitelist", address_params(&a.address)?),
            AclAction::Get(a) => ("getaccessstate", address_params(&a.address)?),
            AclAction::List(args) => {
                let mut params = ArrayParams::new();
                params.insert(args.offset)?;
                params.insert(args.limit)?;
                ("listblockedaddresses", params)
            }
        },
        Commands::Agent(a) => ("getagentstatus", address_params(&a.address)?),
        Commands::Release(a) => ("releaseagent", address_params(&a.address)?),
        Commands::Bans => ("listipbans", ArrayParams::new()),
        Commands::Unban(args) => {
            let mut params = ArrayParams::new();
            params.insert(args.ip)?;
            ("unbanip", params)
        }
        Commands::Info => ("getguardinfo", ArrayParams::new()),
    };

    let result = call(&client, method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn address_params(address: &Address) -> Result<ArrayParams> {
    let mut params = ArrayParams::new();
    params.insert(address.encode())?;
    Ok(params)
}

async fn call(client: &HttpClient, method: &str, params: ArrayParams) -> Result<serde_json::Value> {
    debug!(method, "calling RPC");
    client
        .request(method, params)
        .await
        .with_context(|| format!("RPC {method} failed"))
}

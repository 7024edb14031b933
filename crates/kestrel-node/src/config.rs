//! Node configuration resolved from CLI, then environment, then defaults.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use kestrel_consensus::ChainParams;

/// Network used when none is given.
pub const DEFAULT_NETWORK: &str = "mainnet";

/// Log filter used when none is given.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Command-line options. Each falls back to a `KESTREL_*` variable.
#[derive(Parser, Debug, Default)]
#[command(name = "kestrel-node", version)]
pub struct Config {
    /// Path to the chain database (sled) [env: KESTREL_DB]
    #[arg(long = "db")]
    pub db: Option<PathBuf>,
    /// Network: mainnet, testnet, or regtest [env: KESTREL_NETWORK]
    #[arg(long = "network")]
    pub network: Option<String>,
    /// File of length-prefixed Borsh blocks to import [env: KESTREL_IMPORT]
    #[arg(long = "import")]
    pub import: Option<PathBuf>,
    /// Log filter, e.g. "info,kestrel_chain=debug" [env: RUST_LOG]
    #[arg(long = "log")]
    pub log: Option<String>,
}

/// Final settings.
pub struct ResolvedConfig {
    /// Chain database location.
    pub db_path: PathBuf,
    /// Network parameters.
    pub params: ChainParams,
    /// Blocks to import on startup.
    pub import: Option<PathBuf>,
    /// Tracing filter directive.
    pub log_filter: String,
}

/// Resolve against the process environment.
pub fn resolve_config(cli: Config) -> Result<ResolvedConfig> {
    resolve_with(cli, |key| env::var(key).ok())
}

fn resolve_with(cli: Config, env: impl Fn(&str) -> Option<String>) -> Result<ResolvedConfig> {
    let network = cli
        .network
        .or_else(|| env("KESTREL_NETWORK"))
        .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
    let params =
        ChainParams::by_name(&network).ok_or_else(|| anyhow!("unknown network {network:?}"))?;

    let db_path = cli
        .db
        .or_else(|| env("KESTREL_DB").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(format!("kestrel-{}.db", params.name)));

    let import = cli.import.or_else(|| env("KESTREL_IMPORT").map(PathBuf::from));

    let log_filter = cli
        .log
        .or_else(|| env("RUST_LOG"))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    Ok(ResolvedConfig {
        db_path,
        params,
        import,
        log_filter,
    })
}

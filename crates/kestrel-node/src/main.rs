#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;
use kestrel_chain::{BlockChain, ChainConfig, ChainNotification, SledStore};
use kestrel_node::{import_blocks, resolve_config, BlockReader, Config, ImportStats};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Printed on exit.
#[derive(Serialize)]
struct Summary<'a> {
    network: &'a str,
    height: u64,
    best: String,
    bits: String,
    median_time: u64,
    cumulative_work: String,
    import: Option<ImportStats>,
}

fn main() -> Result<()> {
    let cfg = resolve_config(Config::parse())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.log_filter).context("invalid log filter")?)
        .with_target(false)
        .init();

    info!(
        network = cfg.params.name,
        db = %cfg.db_path.display(),
        "starting kestrel node"
    );

    let store = SledStore::open(&cfg.db_path)
        .with_context(|| format!("opening chain database {}", cfg.db_path.display()))?;
    let network = cfg.params.name;
    let chain = BlockChain::new(ChainConfig::new(store, cfg.params))?;

    chain.subscribe(|n| match n {
        ChainNotification::BlockConnected { hash, height, .. } => {
            info!(%hash, height, "connected")
        }
        ChainNotification::BlockDisconnected { hash, height, .. } => {
            info!(%hash, height, "disconnected")
        }
        ChainNotification::BlockAccepted { hash, height, .. } => {
            debug!(%hash, height, "accepted")
        }
    });

    let import = match &cfg.import {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening {}", path.display()))?;
            info!(file = %path.display(), "importing blocks");
            Some(import_blocks(&chain, BlockReader::new(BufReader::new(file)))?)
        }
        None => None,
    };

    let best = chain.best_snapshot()?;
    let summary = Summary {
        network,
        height: best.height,
        best: best.hash.to_string(),
        bits: format!("{:#010x}", best.bits),
        median_time: best.median_time,
        cumulative_work: best.cumulative_work.to_str_radix(16),
        import,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// Mines a run of regtest blocks on top of genesis and writes them as a block
// file for `kestrel-node --network regtest --import`.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kestrel_consensus::{check_proof_of_work, ChainParams};
use kestrel_core::{
    block_header_hash, merkle_root, txid, Amount, Block, BlockHeader, OutPoint, Transaction,
    TxIn, TxOut, ATOMS_PER_COIN, PROTOCOL_VERSION,
};
use kestrel_node::write_block;

#[derive(Parser, Debug)]
#[command(name = "mine-regtest", version)]
struct Args {
    /// Number of blocks to mine
    #[arg(long = "count", default_value_t = 10)]
    count: u64,
    /// Output block file
    #[arg(long = "out")]
    out: PathBuf,
}

fn coinbase(height: u64) -> Transaction {
    let mut unlock = b"height".to_vec();
    unlock.extend_from_slice(&height.to_le_bytes());
    Transaction {
        version: PROTOCOL_VERSION,
        inputs: vec![TxIn {
            prev_out: OutPoint::null(),
            unlock,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: Amount::from_atoms(50 * ATOMS_PER_COIN),
            lock: Vec::new(),
        }],
        lock_time: 0,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let params = ChainParams::regtest();

    let file = File::create(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    let mut out = BufWriter::new(file);

    let mut parent = params.genesis.header.clone();
    println!("Mining {} regtest blocks into {}", args.count, args.out.display());
    let start = std::time::Instant::now();

    for height in 1..=args.count {
        let txs = vec![coinbase(height)];
        let ids = txs.iter().map(txid).collect::<Result<Vec<_>, _>>()?;
        let mut header = BlockHeader {
            version: PROTOCOL_VERSION,
            prev: block_header_hash(&parent)?,
            merkle_root: merkle_root(&ids),
            timestamp: parent.timestamp + params.target_spacing_secs,
            bits: parent.bits,
            nonce: 0,
        };
        while check_proof_of_work(&header, params.pow_limit_bits, true).is_err() {
            header.nonce += 1;
        }
        println!("height {height}: {} (nonce {})", block_header_hash(&header)?, header.nonce);
        write_block(&mut out, &Block { header: header.clone(), txs })?;
        parent = header;
    }

    out.flush()?;
    println!("Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

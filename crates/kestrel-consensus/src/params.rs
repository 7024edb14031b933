//! Per-network chain parameters.

use crate::difficulty::bits_to_target;
use crate::error::ConsensusError;
use crate::pow::pow_hash;
use crate::retarget::RetargetRule;
use kestrel_core::{
    merkle_root, txid, Amount, Block, BlockHeader, Hash32, OutPoint, Transaction, TxIn, TxOut,
    ATOMS_PER_COIN, PROTOCOL_VERSION,
};
use num_bigint::BigUint;

/// Number of ancestors whose timestamps form the median time past.
pub const MEDIAN_TIME_BLOCKS: usize = 11;

/// Default tolerance for timestamps ahead of adjusted network time.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

/// Immutable consensus parameters of one network.
#[derive(Clone, Debug)]
pub struct ChainParams {
    /// Human-readable network name.
    pub name: &'static str,
    /// Genesis block; inserted without validation.
    pub genesis: Block,
    /// Easiest target any block may declare.
    pub pow_limit_bits: u32,
    /// Difficulty adjustment rule.
    pub retarget: RetargetRule,
    /// Desired seconds between blocks.
    pub target_spacing_secs: u64,
    /// Blocks between retargets for [`RetargetRule::Interval`].
    pub retarget_interval: u64,
    /// Actual timespan is clamped to `[T / factor, T * factor]` on retarget.
    pub retarget_adjustment_factor: u64,
    /// Ancestor window for median time past.
    pub median_time_blocks: usize,
    /// Maximum seconds a timestamp may run ahead of adjusted time.
    pub max_future_drift_secs: u64,
    /// Maximum serialized block size in bytes.
    pub max_block_size: usize,
    /// Maximum number of transactions in one block.
    pub max_block_txs: usize,
}

impl ChainParams {
    /// Main network.
    pub fn mainnet() -> Self {
        Self {
            name: "mainnet",
            genesis: genesis_block(1_700_000_000, 0x1d00_ffff, 2_083_236_893),
            pow_limit_bits: 0x1d00_ffff,
            retarget: RetargetRule::Interval,
            target_spacing_secs: 600,
            retarget_interval: 2016,
            retarget_adjustment_factor: 4,
            median_time_blocks: MEDIAN_TIME_BLOCKS,
            max_future_drift_secs: MAX_FUTURE_DRIFT_SECS,
            max_block_size: 1_000_000,
            max_block_txs: 10_000,
        }
    }

    /// Public test network: one-minute blocks with per-block LWMA retargeting.
    pub fn testnet() -> Self {
        Self {
            name: "testnet",
            genesis: genesis_block(1_700_000_600, 0x1e00_ffff, 0),
            pow_limit_bits: 0x1e00_ffff,
            retarget: RetargetRule::Lwma { window: 45 },
            target_spacing_secs: 60,
            retarget_interval: 1,
            retarget_adjustment_factor: 4,
            median_time_blocks: MEDIAN_TIME_BLOCKS,
            max_future_drift_secs: MAX_FUTURE_DRIFT_SECS,
            max_block_size: 1_000_000,
            max_block_txs: 10_000,
        }
    }

    /// Local regression network: trivial difficulty, no retargeting.
    pub fn regtest() -> Self {
        Self {
            name: "regtest",
            genesis: genesis_block(1_700_001_200, 0x207f_ffff, 2),
            pow_limit_bits: 0x207f_ffff,
            retarget: RetargetRule::None,
            target_spacing_secs: 600,
            retarget_interval: 150,
            retarget_adjustment_factor: 4,
            median_time_blocks: MEDIAN_TIME_BLOCKS,
            max_future_drift_secs: MAX_FUTURE_DRIFT_SECS,
            max_block_size: 1_000_000,
            max_block_txs: 10_000,
        }
    }

    /// Look up parameters by network name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "mainnet" | "main" => Some(Self::mainnet()),
            "testnet" | "test" => Some(Self::testnet()),
            "regtest" => Some(Self::regtest()),
            _ => None,
        }
    }

    /// Identity hash of the genesis block.
    pub fn genesis_hash(&self) -> Result<Hash32, ConsensusError> {
        pow_hash(&self.genesis.header)
    }

    /// Easiest permitted target.
    pub fn pow_limit(&self) -> Result<BigUint, ConsensusError> {
        bits_to_target(self.pow_limit_bits)
    }

    /// Desired duration of one retarget interval.
    pub fn target_timespan_secs(&self) -> u64 {
        self.target_spacing_secs.saturating_mul(self.retarget_interval)
    }
}

/// Build a genesis block paying a single coinbase output.
pub fn genesis_block(timestamp: u64, bits: u32, nonce: u64) -> Block {
    let coinbase = Transaction {
        version: PROTOCOL_VERSION,
        inputs: vec![TxIn {
            prev_out: OutPoint::null(),
            unlock: b"kestrel genesis".to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: Amount::from_atoms(50 * ATOMS_PER_COIN),
            lock: Vec::new(),
        }],
        lock_time: 0,
    };
    // A fixed coinbase this small always encodes.
    let root = txid(&coinbase)
        .map(|id| merkle_root(&[id]))
        .unwrap_or_else(|_| Hash32::zero());

    Block {
        header: BlockHeader {
            version: PROTOCOL_VERSION,
            prev: Hash32::zero(),
            merkle_root: root,
            timestamp,
            bits,
            nonce,
        },
        txs: vec![coinbase],
    }
}

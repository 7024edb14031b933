#![allow(dead_code)]

use std::sync::Arc;

use kestrel_chain::{
    BehaviorFlags, BlockChain, ChainConfig, ChainNotification, ChainStore, MedianTime,
    MemoryStore, ProcessOutcome, ChainError,
};
use kestrel_consensus::{check_proof_of_work, ChainParams, StructuralValidator, TransactionValidator};
use kestrel_core::{
    block_header_hash, merkle_root, txid, Amount, Block, BlockHeader, Hash32, OutPoint,
    Transaction, TxIn, TxOut, PROTOCOL_VERSION,
};
use parking_lot::Mutex;

/// Fixed wall clock, well past the regtest genesis timestamp.
pub const NOW: i64 = 1_700_001_200 + 30 * 24 * 60 * 60;

pub const SPACING: u64 = 600;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Accepted(Hash32),
    Connected(Hash32, u64),
    Disconnected(Hash32, u64),
}

pub struct Harness<S: ChainStore = MemoryStore> {
    pub chain: BlockChain<S>,
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl<S: ChainStore> Harness<S> {
    pub fn submit(&self, block: &Block) -> Result<ProcessOutcome, ChainError> {
        self.chain.process_block(block.clone(), BehaviorFlags::NONE)
    }

    pub fn tip(&self) -> Hash32 {
        self.chain.best_snapshot().unwrap().hash
    }

    pub fn height(&self) -> u64 {
        self.chain.best_snapshot().unwrap().height
    }

    pub fn genesis(&self) -> Block {
        self.chain.params().genesis.clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn connected(&self) -> Vec<Hash32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Connected(h, _) => Some(*h),
                _ => None,
            })
            .collect()
    }
}

pub fn config<S: ChainStore>(store: S) -> ChainConfig<S> {
    ChainConfig::new(store, ChainParams::regtest())
        .with_time_source(Arc::new(MedianTime::with_clock(|| NOW)))
}

pub fn harness() -> (Harness, MemoryStore) {
    let store = MemoryStore::new();
    (open(config(store.clone())), store)
}

pub fn harness_with_validator(validator: Arc<dyn TransactionValidator>) -> (Harness, MemoryStore) {
    let store = MemoryStore::new();
    (open(config(store.clone()).with_tx_validator(validator)), store)
}

pub fn open<S: ChainStore>(config: ChainConfig<S>) -> Harness<S> {
    let chain = BlockChain::new(config).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    chain.subscribe(move |n| {
        let event = match n {
            ChainNotification::BlockAccepted { hash, .. } => Event::Accepted(*hash),
            ChainNotification::BlockConnected { hash, height, .. } => {
                Event::Connected(*hash, *height)
            }
            ChainNotification::BlockDisconnected { hash, height, .. } => {
                Event::Disconnected(*hash, *height)
            }
        };
        sink.lock().push(event);
    });
    Harness { chain, events }
}

pub fn hash_of(block: &Block) -> Hash32 {
    block_header_hash(&block.header).unwrap()
}

pub fn coinbase(tag: u64) -> Transaction {
    Transaction {
        version: PROTOCOL_VERSION,
        inputs: vec![TxIn {
            prev_out: OutPoint::null(),
            unlock: tag.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: Amount::from_atoms(50),
            lock: vec![],
        }],
        lock_time: 0,
    }
}

/// Unmined child of `parent` with every field chosen by the caller.
pub fn raw_child(parent: &Block, timestamp: u64, bits: u32, tag: u64) -> Block {
    let txs = vec![coinbase(tag)];
    let ids: Vec<Hash32> = txs.iter().map(|tx| txid(tx).unwrap()).collect();
    Block {
        header: BlockHeader {
            version: PROTOCOL_VERSION,
            prev: hash_of(parent),
            merkle_root: merkle_root(&ids),
            timestamp,
            bits,
            nonce: 0,
        },
        txs,
    }
}

pub fn mine(mut block: Block) -> Block {
    let limit = ChainParams::regtest().pow_limit_bits;
    while check_proof_of_work(&block.header, limit, true).is_err() {
        block.header.nonce += 1;
    }
    block
}

/// Valid regtest child: same bits, one spacing later.
pub fn child(parent: &Block, tag: u64) -> Block {
    mine(raw_child(
        parent,
        parent.header.timestamp + SPACING,
        parent.header.bits,
        tag,
    ))
}

/// `n` consecutive valid blocks on top of `parent`.
pub fn branch(parent: &Block, n: usize, tag: u64) -> Vec<Block> {
    let mut out: Vec<Block> = Vec::with_capacity(n);
    for i in 0..n {
        let prev = out.last().unwrap_or(parent).clone();
        out.push(child(&prev, tag * 1000 + i as u64));
    }
    out
}

/// Oracle that refuses to connect one specific block.
pub struct RejectConnect(pub Mutex<Option<Hash32>>);

impl TransactionValidator for RejectConnect {
    fn check_transaction(&self, tx: &Transaction) -> Result<(), String> {
        StructuralValidator.check_transaction(tx)
    }

    fn check_connect(&self, block: &Block, _height: u64) -> Result<(), String> {
        if Some(hash_of(block)) == *self.0.lock() {
            return Err("spends a missing output".into());
        }
        Ok(())
    }
}

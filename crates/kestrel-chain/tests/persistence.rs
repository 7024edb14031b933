mod common;

use common::*;
use kestrel_chain::{BlockStatus, SledStore};
use tempfile::tempdir;

#[test]
fn sled_chain_survives_restart() {
    let dir = tempdir().unwrap();
    let (genesis, main, side) = {
        let h = open(config(SledStore::open(dir.path()).unwrap()));
        let genesis = h.genesis();
        let main = branch(&genesis, 3, 1);
        let side = branch(&genesis, 1, 2);
        for b in main.iter().chain(&side) {
            h.submit(b).unwrap();
        }
        (genesis, main, side)
    };

    let h = open(config(SledStore::open(dir.path()).unwrap()));
    assert_eq!(h.tip(), hash_of(&main[2]));
    assert_eq!(h.height(), 3);
    assert!(h.chain.have_block(&hash_of(&side[0])));
    assert!(!h.chain.main_chain_has_block(&hash_of(&side[0])));
    assert_eq!(h.chain.block_by_hash(&hash_of(&main[1])).unwrap(), Some(main[1].clone()));
    assert!(h.submit(&genesis).unwrap_err().is_already_known());

    let next = child(&main[2], 3);
    assert!(h.submit(&next).unwrap().is_main_chain);
}

#[test]
fn missing_best_record_recovers_heaviest_valid_tip() {
    let dir = tempdir().unwrap();
    let expected = {
        let h = open(config(SledStore::open(dir.path()).unwrap()));
        let genesis = h.genesis();
        let short = branch(&genesis, 2, 1);
        let long = branch(&genesis, 4, 2);
        for b in short.iter().chain(&long) {
            h.submit(b).unwrap();
        }
        hash_of(&long[3])
    };

    SledStore::open(dir.path()).unwrap().clear_best().unwrap();

    let h = open(config(SledStore::open(dir.path()).unwrap()));
    assert_eq!(h.tip(), expected);
    assert_eq!(h.height(), 4);
}

#[test]
fn invalid_records_are_reloaded() {
    let (h, store) = harness();
    let genesis = h.genesis();
    let stale = mine(raw_child(&genesis, genesis.header.timestamp, genesis.header.bits, 1));
    let good = branch(&genesis, 2, 2);
    assert!(h.submit(&stale).is_err());
    for b in &good {
        h.submit(b).unwrap();
    }
    drop(h);

    let h = open(config(store.clone()));
    assert_eq!(h.tip(), hash_of(&good[1]));
    assert_eq!(h.chain.block_status(&hash_of(&stale)), Some(BlockStatus::Invalid));
    assert!(h.submit(&stale).unwrap_err().is_already_known());

    store.clear_best();
    let h = open(config(store));
    assert_eq!(h.tip(), hash_of(&good[1]));
}

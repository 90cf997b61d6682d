//! Overlay journaling: read-through, checkpoint/rollback, commit.

use ethereum_types::{Address, H256};

use super::helpers::{addr, memory_db};
use crate::{
    depop::DepOp,
    formula::{formula_dep_bytes, init_dep_bytes},
    overlay::OverlayDB,
};

#[test]
fn read_through_and_memoization() {
    let (db, _) = memory_db();
    let a = addr(0x01);
    let key = H256::repeat_byte(0x01);

    let stored = db.constant_new(DepOp::Constant, vec![9u8; 32]);
    db.set_slot(a, key, &formula_dep_bytes(&stored)).unwrap();

    let mut overlay = OverlayDB::new(db.clone());
    assert_eq!(
        overlay.get_slot(a, key).unwrap().data,
        formula_dep_bytes(&stored)
    );
    // A missing slot reads as implicit zeroes.
    assert_eq!(
        overlay.get_slot(a, H256::repeat_byte(0x02)).unwrap().data,
        init_dep_bytes(32)
    );
}

#[test]
fn rollback_restores_previous_write() {
    let (db, _) = memory_db();
    let a = addr(0x01);
    let key = H256::zero();
    let mut overlay = OverlayDB::new(db.clone());

    let first = db.constant_new(DepOp::Constant, vec![1u8; 32]);
    overlay.set_slot(a, a, key, formula_dep_bytes(&first));

    let checkpoint = overlay.checkpoint();
    let second = db.constant_new(DepOp::Constant, vec![2u8; 32]);
    overlay.set_slot(a, a, key, formula_dep_bytes(&second));
    assert_eq!(overlay.get_slot(a, key).unwrap().data, formula_dep_bytes(&second));

    overlay.rollback_to(checkpoint);
    assert_eq!(overlay.get_slot(a, key).unwrap().data, formula_dep_bytes(&first));
}

#[test]
fn rollback_discards_destructs_and_creates() {
    let (db, _) = memory_db();
    let a = addr(0x01);
    let mut overlay = OverlayDB::new(db.clone());

    let checkpoint = overlay.checkpoint();
    overlay.destruct(a);
    let code = db.constant_new(DepOp::Constant, vec![0x60u8, 0x00]);
    overlay.set_code(a, a, formula_dep_bytes(&code), &[0x60, 0x00], H256::zero());
    assert!(overlay.created(a));

    overlay.rollback_to(checkpoint);
    assert!(!overlay.created(a));

    // Nothing reaches the store at commit.
    overlay.commit().unwrap();
    assert_eq!(db.get_address_version(a).unwrap(), 0);
    let (_, _, data) = db.get_code(a).unwrap();
    assert!(data.is_empty());
}

#[test]
fn rollback_restores_transient_state() {
    let (db, _) = memory_db();
    let a = addr(0x01);
    let key = H256::zero();
    let mut overlay = OverlayDB::new(db.clone());

    let value = db.constant_new(DepOp::Constant, vec![5u8; 32]);
    overlay.set_transient(a, key, formula_dep_bytes(&value));

    let checkpoint = overlay.checkpoint();
    let other = db.constant_new(DepOp::Constant, vec![6u8; 32]);
    overlay.set_transient(a, key, formula_dep_bytes(&other));

    overlay.rollback_to(checkpoint);
    assert_eq!(overlay.get_transient(a, key), formula_dep_bytes(&value));
}

#[test]
fn commit_writes_slots_and_bumps_versions() {
    let (db, captured) = memory_db();
    let a = addr(0x01);
    let destructed: Address = addr(0x02);
    let key = H256::repeat_byte(0x07);

    let mut overlay = OverlayDB::new(db.clone());
    let value = db
        .constant_new_with_shorts(DepOp::Constant, vec![3u8; 32])
        .unwrap();
    overlay.set_slot(a, a, key, formula_dep_bytes(&value));
    overlay.destruct(destructed);

    overlay.commit().unwrap();

    assert_eq!(db.get_slot(a, key).unwrap(), formula_dep_bytes(&value));
    assert_eq!(db.get_address_version(destructed).unwrap(), 1);
    assert!(captured.borrow().contains("final_slot"));
}

#[test]
fn rolled_back_write_never_reaches_commit() {
    let (db, captured) = memory_db();
    let a = addr(0x01);
    let key = H256::zero();

    let mut overlay = OverlayDB::new(db.clone());
    let checkpoint = overlay.checkpoint();
    let value = db
        .constant_new_with_shorts(DepOp::Constant, vec![1u8; 32])
        .unwrap();
    overlay.set_slot(a, a, key, formula_dep_bytes(&value));
    overlay.rollback_to(checkpoint);

    overlay.commit().unwrap();

    assert_eq!(db.get_slot(a, key).unwrap(), init_dep_bytes(32));
    assert!(!captured.borrow().contains("final_slot"));
}

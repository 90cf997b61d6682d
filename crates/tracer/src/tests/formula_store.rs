//! SimpleDB behavior: slicing, coalescing, persistence and reset.

use ethereum_types::H256;

use super::helpers::{addr, memory_db};
use crate::{
    depop::DepOp,
    formula::{DepByte, formula_dep_bytes, init_dep_bytes},
};

#[test]
fn formula_dep_full_coverage_returns_source() {
    let (db, _) = memory_db();
    let f = db.constant_new(DepOp::Constant, vec![1u8, 2, 3, 4]);
    let shadow = formula_dep_bytes(&f);

    let rebuilt = db.formula_dep(&shadow).unwrap();
    assert_eq!(rebuilt.hash(), f.hash());
}

#[test]
fn formula_dep_partial_coverage_becomes_slice() {
    let (db, _) = memory_db();
    let f = db.constant_new(DepOp::Constant, vec![1u8, 2, 3, 4]);
    let shadow = &formula_dep_bytes(&f)[1..3];

    let rebuilt = db.formula_dep(shadow).unwrap();
    assert_eq!(rebuilt.opcode(), DepOp::Slice);
    assert_eq!(rebuilt.result().as_ref(), &[2u8, 3]);
    assert_eq!(rebuilt.operands()[0], f.hash());
}

#[test]
fn formula_dep_mixed_sources_become_concat() {
    let (db, _) = memory_db();
    let a = db.constant_new(DepOp::Constant, vec![1u8, 2]);
    let b = db.constant_new(DepOp::Constant, vec![3u8, 4]);

    let mut shadow = formula_dep_bytes(&a);
    shadow.extend(formula_dep_bytes(&b));

    let rebuilt = db.formula_dep(&shadow).unwrap();
    assert_eq!(rebuilt.opcode(), DepOp::Concat);
    assert_eq!(rebuilt.result().as_ref(), &[1u8, 2, 3, 4]);
    assert_eq!(rebuilt.operands(), &[a.hash(), b.hash()]);
}

#[test]
fn formula_dep_empty_is_empty_concat() {
    let (db, _) = memory_db();
    let rebuilt = db.formula_dep(&[]).unwrap();
    assert_eq!(rebuilt.opcode(), DepOp::Concat);
    assert!(rebuilt.result().is_empty());
    assert!(rebuilt.operands().is_empty());
}

#[test]
fn formula_dep_non_consecutive_positions_split() {
    let (db, _) = memory_db();
    let f = db.constant_new(DepOp::Constant, vec![1u8, 2, 3, 4]);
    // Bytes 2 then 1: positions go backwards, so two ranges.
    let shadow = vec![
        DepByte { pos: 2, formula: f.hash() },
        DepByte { pos: 1, formula: f.hash() },
    ];

    let rebuilt = db.formula_dep(&shadow).unwrap();
    assert_eq!(rebuilt.opcode(), DepOp::Concat);
    assert_eq!(rebuilt.operands().len(), 2);
    assert_eq!(rebuilt.result().as_ref(), &[3u8, 2]);
}

#[test]
fn formula_slice_wraps_and_fuses() {
    let (db, _) = memory_db();
    let f = db.constant_new(DepOp::Constant, vec![0u8, 1, 2, 3, 4, 5, 6, 7]);

    let outer = db.formula_slice(&f, 2, 4).unwrap();
    assert_eq!(outer.opcode(), DepOp::Slice);
    assert_eq!(outer.result().as_ref(), &[2u8, 3, 4, 5]);

    // Slicing a slice fuses the offsets against the original source.
    let inner = db.formula_slice(&outer, 1, 2).unwrap();
    assert_eq!(inner.opcode(), DepOp::Slice);
    assert_eq!(inner.result().as_ref(), &[3u8, 4]);
    assert_eq!(inner.operands()[0], f.hash());
    let offset_formula = db.get_formula(inner.operands()[1]).unwrap();
    assert_eq!(offset_formula.result().as_ref(), &3u64.to_be_bytes());
}

#[test]
fn formula_slice_traverses_concat() {
    let (db, _) = memory_db();
    let a = db.constant_new(DepOp::Constant, vec![1u8, 2]);
    let b = db.constant_new(DepOp::Constant, vec![3u8, 4]);
    let concat = db.formula_new(
        DepOp::Concat,
        vec![1u8, 2, 3, 4],
        vec![a.hash(), b.hash()],
    );

    // Exactly the second child.
    let tail = db.formula_slice(&concat, 2, 2).unwrap();
    assert_eq!(tail.hash(), b.hash());

    // Straddling both children.
    let middle = db.formula_slice(&concat, 1, 2).unwrap();
    assert_eq!(middle.opcode(), DepOp::Concat);
    assert_eq!(middle.result().as_ref(), &[2u8, 3]);
    assert_eq!(middle.operands().len(), 2);
}

#[test]
fn formula_slice_empty_is_empty_concat() {
    let (db, _) = memory_db();
    let f = db.constant_new(DepOp::Constant, vec![1u8, 2]);
    let empty = db.formula_slice(&f, 1, 0).unwrap();
    assert_eq!(empty.opcode(), DepOp::Concat);
    assert!(empty.result().is_empty());
}

#[test]
fn reset_keeps_persisted_nodes_only() {
    let (db, _) = memory_db();
    let persisted = db
        .constant_new_with_shorts(DepOp::Constant, vec![0xAAu8; 32])
        .unwrap();
    let transient = db
        .constant_new_with_shorts(DepOp::Constant, vec![0xBBu8; 32])
        .unwrap();
    db.commit_formula_with_shorts(persisted.hash()).unwrap();

    db.reset_formulas();

    assert_eq!(
        db.get_formula(persisted.hash()).unwrap().hash(),
        persisted.hash()
    );
    assert!(db.get_formula(transient.hash()).is_err());
}

#[test]
fn commit_persists_operands_transitively() {
    let (db, _) = memory_db();
    let leaf = db.constant_new(DepOp::Constant, vec![7u8; 32]);
    let mid = db.formula_new(DepOp::Not, vec![8u8; 32], vec![leaf.hash()]);
    let root = db.formula_new(DepOp::Add, vec![9u8; 32], vec![mid.hash(), leaf.hash()]);

    db.commit_formula(root.hash()).unwrap();
    db.reset_formulas();

    for hash in [root.hash(), mid.hash(), leaf.hash()] {
        assert!(db.get_formula(hash).is_ok());
    }
}

#[test]
fn slot_round_trip_and_default() {
    let (db, _) = memory_db();
    let a = addr(0x01);
    let key = H256::repeat_byte(0x42);

    assert_eq!(db.get_slot(a, key).unwrap(), init_dep_bytes(32));

    let f = db.constant_new(DepOp::Constant, vec![5u8; 32]);
    let shadow = formula_dep_bytes(&f);
    db.set_slot(a, key, &shadow).unwrap();
    assert_eq!(db.get_slot(a, key).unwrap(), shadow);

    // Other keys and addresses stay untouched.
    assert_eq!(
        db.get_slot(a, H256::repeat_byte(0x43)).unwrap(),
        init_dep_bytes(32)
    );
    assert_eq!(db.get_slot(addr(0x02), key).unwrap(), init_dep_bytes(32));
}

#[test]
fn version_bump_hides_previous_slot_state() {
    let (db, _) = memory_db();
    let a = addr(0x01);
    let key = H256::zero();

    let f = db.constant_new(DepOp::Constant, vec![5u8; 32]);
    db.set_slot(a, key, &formula_dep_bytes(&f)).unwrap();

    db.increase_address_version(a).unwrap();
    assert_eq!(db.get_address_version(a).unwrap(), 1);
    assert_eq!(db.get_slot(a, key).unwrap(), init_dep_bytes(32));
}

#[test]
fn code_round_trip_trims_longer_predecessor() {
    let (db, _) = memory_db();
    let a = addr(0x03);

    let long = db.constant_new(DepOp::Constant, vec![1u8, 2, 3, 4]);
    db.set_code(a, &formula_dep_bytes(&long), H256::repeat_byte(1), H256::repeat_byte(2))
        .unwrap();

    let short = db.constant_new(DepOp::Constant, vec![9u8, 8]);
    db.set_code(a, &formula_dep_bytes(&short), H256::repeat_byte(3), H256::repeat_byte(4))
        .unwrap();

    let (code_hash, initcode_hash, data) = db.get_code(a).unwrap();
    assert_eq!(code_hash, H256::repeat_byte(3));
    assert_eq!(initcode_hash, H256::repeat_byte(4));
    assert_eq!(data, formula_dep_bytes(&short));
}

#[test]
fn render_compresses_repeated_operands() {
    let (db, _) = memory_db();
    let zero = db.constant_new(DepOp::Constant, vec![0u8]);
    let concat = db.formula_new(
        DepOp::Concat,
        vec![0u8, 0, 0],
        vec![zero.hash(), zero.hash(), zero.hash()],
    );

    let rendered = db.render(&concat).unwrap();
    assert!(rendered.contains("OPConstant(0x00) * 3"), "{rendered}");
}

//! Solidity view recovery from slot formulas.

use super::helpers::memory_db;
use crate::{
    depop::DepOp,
    sol_view::{SolLine, SolView},
};

#[test]
fn plain_constant_slot() {
    let (db, _) = memory_db();
    let slot = db.constant_new(DepOp::Constant, vec![7u8; 32]);

    let view = SolView::build(&db, &slot).unwrap();
    assert_eq!(view.entries(), &[SolLine::Constant(vec![7u8; 32])]);
}

#[test]
fn mapping_slot_splits_key_and_base() {
    let (db, _) = memory_db();

    // keccak(key(32) ‖ base(32)) — the Solidity mapping layout.
    let mut preimage_bytes = vec![0xABu8; 32];
    let mut base = vec![0u8; 32];
    base[31] = 0x07;
    preimage_bytes.extend_from_slice(&base);
    let preimage = db.constant_new(DepOp::Constant, preimage_bytes);
    let hash = db.formula_new(DepOp::Keccak, vec![0xCCu8; 32], vec![preimage.hash()]);

    let view = SolView::build(&db, &hash).unwrap();
    assert_eq!(
        view.entries(),
        &[
            SolLine::Constant(base),
            SolLine::Mapping(vec![0xABu8; 32]),
        ]
    );
}

#[test]
fn nested_mapping_recurses_through_base() {
    let (db, _) = memory_db();

    // keccak(k2 ‖ keccak(k1 ‖ base)) — mapping of mapping. Because the
    // inner hash appears literally inside the outer preimage, the walk sees
    // the outer key as the 32-byte prefix.
    let mut inner_bytes = vec![0x11u8; 32];
    inner_bytes.extend_from_slice(&[0u8; 32]);
    let inner_preimage = db.constant_new(DepOp::Constant, inner_bytes);
    let inner = db.formula_new(DepOp::Keccak, vec![0xAAu8; 32], vec![inner_preimage.hash()]);

    let outer_key = db.constant_new(DepOp::Constant, vec![0x22u8; 32]);
    let mut outer_result = vec![0x22u8; 32];
    outer_result.extend_from_slice(&[0xAAu8; 32]);
    let outer_preimage = db.formula_new(
        DepOp::Concat,
        outer_result,
        vec![outer_key.hash(), inner.hash()],
    );
    let outer = db.formula_new(DepOp::Keccak, vec![0xBBu8; 32], vec![outer_preimage.hash()]);

    let view = SolView::build(&db, &outer).unwrap();
    let entries = view.entries();
    assert_eq!(entries.len(), 3);
    // Innermost base slot, inner key, then the outer key.
    assert_eq!(entries[0], SolLine::Constant(vec![0u8; 32]));
    assert_eq!(entries[1], SolLine::Mapping(vec![0x11u8; 32]));
    assert_eq!(entries[2], SolLine::Mapping(vec![0x22u8; 32]));
}

#[test]
fn add_with_keccak_side_emits_offset() {
    let (db, _) = memory_db();

    let mut preimage_bytes = vec![0xABu8; 32];
    preimage_bytes.extend_from_slice(&[0u8; 32]);
    let preimage = db.constant_new(DepOp::Constant, preimage_bytes);
    let hash = db.formula_new(DepOp::Keccak, vec![0xCCu8; 32], vec![preimage.hash()]);

    let mut offset = vec![0u8; 32];
    offset[31] = 2;
    let offset_const = db.constant_new(DepOp::Constant, offset.clone());

    let slot = db.formula_new(
        DepOp::Add,
        vec![0xCEu8; 32],
        vec![hash.hash(), offset_const.hash()],
    );

    let view = SolView::build(&db, &slot).unwrap();
    let entries = view.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1], SolLine::Mapping(vec![0xABu8; 32]));
    assert_eq!(entries[2], SolLine::Offset(offset));

    // Operand order must not matter.
    let swapped = db.formula_new(
        DepOp::Add,
        vec![0xCEu8; 32],
        vec![offset_const.hash(), hash.hash()],
    );
    assert_eq!(SolView::build(&db, &swapped).unwrap().entries(), entries);
}

#[test]
fn zero_offset_is_omitted() {
    let (db, _) = memory_db();

    let mut preimage_bytes = vec![0xABu8; 32];
    preimage_bytes.extend_from_slice(&[0u8; 32]);
    let preimage = db.constant_new(DepOp::Constant, preimage_bytes);
    let hash = db.formula_new(DepOp::Keccak, vec![0xCCu8; 32], vec![preimage.hash()]);

    let zero = db.constant_new(DepOp::Constant, vec![0u8; 32]);
    let slot = db.formula_new(
        DepOp::Add,
        vec![0xCCu8; 32],
        vec![hash.hash(), zero.hash()],
    );

    let view = SolView::build(&db, &slot).unwrap();
    assert!(
        !view
            .entries()
            .iter()
            .any(|line| matches!(line, SolLine::Offset(_)))
    );
}

#[test]
fn add_without_keccak_is_opaque() {
    let (db, _) = memory_db();
    let a = db.constant_new(DepOp::Constant, vec![1u8; 32]);
    let b = db.constant_new(DepOp::Constant, vec![2u8; 32]);
    let slot = db.formula_new(DepOp::Add, vec![3u8; 32], vec![a.hash(), b.hash()]);

    let view = SolView::build(&db, &slot).unwrap();
    assert_eq!(view.entries(), &[SolLine::Constant(vec![3u8; 32])]);
}

#[test]
fn short_preimage_hash_is_constant() {
    let (db, _) = memory_db();
    let preimage = db.constant_new(DepOp::Constant, vec![1u8, 2, 3]);
    let hash = db.formula_new(DepOp::Keccak, vec![0xCCu8; 32], vec![preimage.hash()]);

    let view = SolView::build(&db, &hash).unwrap();
    assert_eq!(view.entries(), &[SolLine::Constant(vec![0xCCu8; 32])]);
}

#[test]
fn array_data_slot_has_empty_mapping_key() {
    let (db, _) = memory_db();
    // keccak over exactly 32 bytes: array data pointer, empty key.
    let preimage = db.constant_new(DepOp::Constant, vec![5u8; 32]);
    let hash = db.formula_new(DepOp::Keccak, vec![0xCCu8; 32], vec![preimage.hash()]);

    let view = SolView::build(&db, &hash).unwrap();
    assert_eq!(
        view.entries(),
        &[
            SolLine::Constant(vec![5u8; 32]),
            SolLine::Mapping(Vec::new()),
        ]
    );
    assert!(view.lines()[1].contains("possibly array"));
}

//! End-to-end traces: synthetic host callback sequences over small
//! programs, checked against the stored provenance.

use ethereum_types::{H256, U256};
use hex_literal::hex;

use super::helpers::{Host, addr, word};
use crate::{
    depop::DepOp,
    formula::{INIT_ZERO, init_dep_bytes},
    opcodes::*,
};

/// `PUSH1 05; PUSH1 03; ADD; PUSH0; MSTORE; PUSH1 20; PUSH1 00; RETURN`
/// — constant propagation into returndata.
#[test]
fn constant_propagation_into_returndata() {
    let code = [
        0x60, 0x05, 0x60, 0x03, 0x01, 0x5F, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    let contract = addr(0xAA);
    let mut host = Host::new();
    host.start_block();
    host.start_tx(contract, &[0x01], &code);

    let mut memory = [0u8; 32];
    memory[31] = 0x08;

    host.op(0, PUSH1, &[], &[]);
    host.op(2, PUSH1, &[5], &[]);
    host.op(4, ADD, &[5, 3], &[]);
    host.op(5, PUSH0, &[8], &[]);
    host.op(6, MSTORE, &[8, 0], &[]);
    host.op(7, PUSH1, &[], &memory);
    host.op(9, PUSH1, &[0x20], &memory);
    host.op(11, RETURN, &[0x20, 0x00], &memory);

    // Inspect the returndata before the frame state is torn down.
    let state = host.handler.state().unwrap();
    let returndata = state.returndata().to_vec();
    assert_eq!(returndata.len(), 32);

    let db = host.handler.db().clone();
    let full = db.formula_dep(&returndata).unwrap();
    assert_eq!(full.opcode(), DepOp::Add);
    let mut expected = [0u8; 32];
    expected[31] = 0x08;
    assert_eq!(full.result().as_ref(), &expected);

    // Crypto view: nothing cryptographic, so the whole tree is a literal.
    let entry = db.shorts()[0].load_entry(full.hash()).unwrap();
    assert!(!entry.protected);
    let twin = db.get_formula(entry.hash).unwrap();
    assert_eq!(twin.opcode(), DepOp::Constant);
    assert_eq!(twin.result().as_ref(), &expected);

    // The ADD operands trace back to the executing code bytes.
    let operand = db.get_formula(full.operands()[0]).unwrap();
    assert_eq!(operand.opcode(), DepOp::Concat);

    host.exit(&[], false);
    host.end_tx();

    assert!(host.output().contains("\"event_type\": \"return\""));
}

/// `PUSH0; CALLDATALOAD; PUSH0; SSTORE; STOP` — calldata flows to storage.
#[test]
fn calldata_flows_to_storage() {
    let code = [0x5F, 0x35, 0x5F, 0x55, 0x00];
    let contract = addr(0xAB);
    let calldata = [0x2Au8; 32];

    let mut host = Host::new();
    host.start_block();
    host.start_tx(contract, &calldata, &code);

    let value = U256::from_big_endian(&calldata);

    host.op(0, PUSH0, &[], &[]);
    host.op(1, CALLDATALOAD, &[0], &[]);
    host.op_words(2, PUSH0, &[value], &[]);
    host.op_words(3, SSTORE, &[value, word(0)], &[]);
    host.op(4, STOP, &[], &[]);
    host.exit(&[], false);
    host.end_tx();

    let db = host.handler.db().clone();
    let stored = db.get_slot(contract, H256::zero()).unwrap();
    assert_eq!(stored.len(), 32);

    let store_formula = db.get_formula(stored[0].formula).unwrap();
    assert_eq!(store_formula.opcode(), DepOp::SStore);

    // Value operand: the full calldata constant.
    let value_formula = db.get_formula(store_formula.operands()[0]).unwrap();
    assert_eq!(value_formula.opcode(), DepOp::CallData);
    assert_eq!(value_formula.result().as_ref(), &calldata);

    // Slot operand: thirty-two implicit zeroes.
    let slot_formula = db.get_formula(store_formula.operands()[1]).unwrap();
    assert_eq!(slot_formula.opcode(), DepOp::Concat);
    assert!(
        slot_formula
            .operands()
            .iter()
            .all(|h| *h == INIT_ZERO.hash())
    );

    assert!(host.output().contains("final_slot"));
}

/// Mapping store: the committed slot decodes as `constant 07` + the key.
#[test]
fn mapping_store_decodes_in_solidity_view() {
    // PUSH1 04; CALLDATALOAD; PUSH0; MSTORE; PUSH1 07; PUSH1 20; MSTORE;
    // PUSH1 40; PUSH1 00; KECCAK256; PUSH1 2A; SWAP1; SSTORE; STOP
    let code = [
        0x60, 0x04, 0x35, 0x5F, 0x52, 0x60, 0x07, 0x60, 0x20, 0x52, 0x60, 0x40, 0x60, 0x00,
        0x20, 0x60, 0x2A, 0x90, 0x55, 0x00,
    ];
    let contract = addr(0xAC);
    let key = [0xABu8; 32];
    let mut calldata = vec![0xDE, 0xAD, 0xBE, 0xEF];
    calldata.extend_from_slice(&key);

    let mut host = Host::new();
    host.start_block();
    host.start_tx(contract, &calldata, &code);

    let key_word = U256::from_big_endian(&key);
    let slot_hash = U256::from_big_endian(&[0xDDu8; 32]);

    host.op(0, PUSH1, &[], &[]);
    host.op(2, CALLDATALOAD, &[4], &[]);
    host.op_words(3, PUSH0, &[key_word], &[]);
    host.op_words(4, MSTORE, &[key_word, word(0)], &[]);
    host.op(5, PUSH1, &[], &[]);
    host.op(7, PUSH1, &[7], &[]);
    host.op(9, MSTORE, &[7, 0x20], &[]);
    host.op(10, PUSH1, &[], &[]);
    host.op(12, PUSH1, &[0x40], &[]);
    host.op(14, KECCAK256, &[0x40, 0x00], &[]);
    host.op_words(15, PUSH1, &[slot_hash], &[]);
    host.op_words(17, SWAP1, &[slot_hash, word(0x2A)], &[]);
    host.op_words(18, SSTORE, &[word(0x2A), slot_hash], &[]);
    host.op(19, STOP, &[], &[]);
    host.exit(&[], false);
    host.end_tx();

    let db = host.handler.db().clone();
    let stored = db
        .get_slot(contract, H256(slot_hash.to_big_endian()))
        .unwrap();
    let store_formula = db.get_formula(stored[0].formula).unwrap();
    assert_eq!(store_formula.opcode(), DepOp::SStore);

    // Decode through the crypto view, the way the logger does.
    let entry = db.shorts()[0].load_entry(store_formula.hash()).unwrap();
    let twin = db.get_formula(entry.hash).unwrap();
    let slot_operand = db.get_formula(twin.operands()[1]).unwrap();
    assert_eq!(slot_operand.opcode(), DepOp::Keccak);

    let view = crate::sol_view::SolView::build(&db, &slot_operand).unwrap();
    let entries = view.entries();
    assert_eq!(entries.len(), 2);
    let mut base = vec![0u8; 32];
    base[31] = 0x07;
    assert_eq!(entries[0], crate::sol_view::SolLine::Constant(base));
    assert_eq!(entries[1], crate::sol_view::SolLine::Mapping(key.to_vec()));

    let output = host.output();
    assert!(output.contains("## SOLIDITY"), "{output}");
    assert!(output.contains("mapping"), "{output}");
}

/// A reverted inner call leaves no trace in committed storage.
#[test]
fn revert_hides_inner_writes() {
    let outer = addr(0xA1);
    let inner = addr(0xA2);

    // Outer: 7x PUSH0-ish args then CALL; STOP.
    // Inner: PUSH1 01; PUSH0; SSTORE; PUSH0; PUSH0; REVERT.
    let outer_code = [0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0xF1, 0x00];
    let mut host = Host::new();
    host.start_block();
    host.start_tx(outer, &[], &outer_code);

    let inner_word = U256::from_big_endian(inner.as_bytes());

    // Seven pushes supply the CALL arguments.
    host.op(0, PUSH0, &[], &[]);
    host.op(1, PUSH0, &[0], &[]);
    host.op(2, PUSH0, &[0, 0], &[]);
    host.op(3, PUSH0, &[0, 0, 0], &[]);
    host.op(4, PUSH0, &[0, 0, 0, 0], &[]);
    host.op_words(5, PUSH0, &[word(0), word(0), word(0), word(0), word(0)], &[]);
    host.op_words(
        6,
        PUSH0,
        &[word(0), word(0), word(0), word(0), word(0), inner_word],
        &[],
    );
    // Stack (bottom→top): retSize, retOffset, inSize, inOffset, value, addr, gas.
    host.op_words(
        7,
        CALL,
        &[
            word(0),
            word(0),
            word(0),
            word(0),
            word(0),
            inner_word,
            word(100_000),
        ],
        &[],
    );
    host.handler.on_enter(inner, &[]);

    // Inner frame executes and reverts.
    host.op_at(inner, 0, PUSH1, &[], &[]);
    host.op_at(inner, 2, PUSH0, &[word(1)], &[]);
    host.op_at(inner, 3, SSTORE, &[word(1), word(0)], &[]);
    host.op_at(inner, 4, PUSH0, &[], &[]);
    host.op_at(inner, 5, PUSH0, &[word(0)], &[]);
    host.op_at(inner, 6, REVERT, &[word(0), word(0)], &[]);
    host.exit(&[], true);

    // Back in the outer frame.
    host.op(8, STOP, &[word(0)], &[]);
    host.exit(&[], false);
    host.end_tx();

    let db = host.handler.db().clone();
    assert_eq!(
        db.get_slot(inner, H256::zero()).unwrap(),
        init_dep_bytes(32)
    );
    assert_eq!(
        db.get_slot(outer, H256::zero()).unwrap(),
        init_dep_bytes(32)
    );
    assert!(!host.output().contains("final_slot"));
}

/// Pre-Cancun selfdestruct bumps the address version: the next transaction
/// reads implicit zeroes.
#[test]
fn selfdestruct_bumps_version() {
    let contract = addr(0xB1);
    // Tx1: PUSH1 01; PUSH0; SSTORE; PUSH0; SELFDESTRUCT
    let code1 = [0x60, 0x01, 0x5F, 0x55, 0x5F, 0xFF];

    let mut host = Host::new();
    host.start_block();
    host.start_tx(contract, &[], &code1);

    host.op(0, PUSH1, &[], &[]);
    host.op(2, PUSH0, &[1], &[]);
    host.op(3, SSTORE, &[1, 0], &[]);
    host.op(4, PUSH0, &[], &[]);
    host.op(5, SELFDESTRUCT, &[0], &[]);
    // The host reports the beneficiary transfer as an enter/exit pair.
    host.handler.on_enter(addr(0xB2), &[]);
    host.exit(&[], false); // swallowed by the protector
    host.exit(&[], false); // the real frame exit
    host.end_tx();

    let db = host.handler.db().clone();
    assert_eq!(db.get_address_version(contract).unwrap(), 1);

    // Tx2: PUSH0; SLOAD; JUMPDEST (completes the SLOAD); STOP
    let code2 = [0x5F, 0x54, 0x5B, 0x00];
    host.start_tx(contract, &[], &code2);
    host.op(0, PUSH0, &[], &[]);
    host.op(1, SLOAD, &[0], &[]);
    host.op(2, JUMPDEST, &[0], &[]);

    {
        let state = host.handler.state().unwrap();
        let top = *state.stack().unwrap().peek(0).unwrap();
        let db = host.handler.db().clone();
        let load = db.get_formula(top[0].formula).unwrap();
        assert_eq!(load.opcode(), DepOp::SLoad);
        // The loaded value is implicit zeroes: the old write is invisible.
        let value = db.get_formula(load.operands()[0]).unwrap();
        assert_eq!(value.opcode(), DepOp::Concat);
        assert!(value.operands().iter().all(|h| *h == INIT_ZERO.hash()));
    }

    host.op(3, STOP, &[0], &[]);
    host.exit(&[], false);
    host.end_tx();
}

/// Under Cancun, selfdestruct of a pre-existing address behaves as STOP.
#[test]
fn selfdestruct_6780_spares_existing_address() {
    let contract = addr(0xB3);
    let code = [0x60, 0x01, 0x5F, 0x55, 0x5F, 0xFF];

    let mut host = Host::new();
    host.start_block();
    host.start_tx_with_forks(contract, &[], &code, true);

    host.op(0, PUSH1, &[], &[]);
    host.op(2, PUSH0, &[1], &[]);
    host.op(3, SSTORE, &[1, 0], &[]);
    host.op(4, PUSH0, &[], &[]);
    host.op(5, SELFDESTRUCT, &[0], &[]);
    host.handler.on_enter(addr(0xB4), &[]);
    host.exit(&[], false);
    host.exit(&[], false);
    host.end_tx();

    let db = host.handler.db().clone();
    // No version bump, and the write survives.
    assert_eq!(db.get_address_version(contract).unwrap(), 0);
    let stored = db.get_slot(contract, H256::zero()).unwrap();
    assert_eq!(
        db.get_formula(stored[0].formula).unwrap().opcode(),
        DepOp::SStore
    );
}

/// CREATE2 pushes the EIP-1014 address, tagged `OPCreate2Addr`.
#[test]
fn create2_address_derivation() {
    let sender = addr(0x00); // the zero address, as in the EIP example
    let expected = hex!("4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38");

    // PUSH0(salt); PUSH1 01(size); PUSH0(offset); PUSH0(value); CREATE2;
    // then the initcode frame runs `STOP` (the single 0x00 byte).
    let code = [0x5F, 0x60, 0x01, 0x5F, 0x5F, 0xF5, 0x00];
    let mut host = Host::new();
    host.start_block();
    host.start_tx(sender, &[], &code);

    host.op_at(sender, 0, PUSH0, &[], &[]);
    host.op_at(sender, 1, PUSH1, &[word(0)], &[]);
    host.op_at(sender, 3, PUSH0, &[word(0), word(1)], &[]);
    host.op_at(sender, 4, PUSH0, &[word(0), word(1), word(0)], &[]);
    // Stack (bottom→top): salt, size, offset, value. Memory holds 0x00.
    host.op_at(
        sender,
        5,
        CREATE2,
        &[word(0), word(1), word(0), word(0)],
        &[0x00],
    );

    {
        // The create frame is live and runs the initcode.
        let state = host.handler.state().unwrap();
        assert!(state.is_create().unwrap());
        assert_eq!(state.address().unwrap().as_bytes(), expected);
    }

    host.handler.on_enter(ethereum_types::Address::from(expected), &[0x00]);
    host.op_at(ethereum_types::Address::from(expected), 0, STOP, &[], &[]);
    host.exit(&[], false);

    // Back in the sender frame: the constructed address is on the stack.
    {
        let state = host.handler.state().unwrap();
        let top = *state.stack().unwrap().peek(0).unwrap();
        let db = host.handler.db().clone();
        assert_eq!(top[11].formula, INIT_ZERO.hash());
        let tag = db.get_formula(top[12].formula).unwrap();
        assert_eq!(tag.opcode(), DepOp::Create2Addr);
        assert_eq!(tag.result().as_ref(), &expected);
    }

    host.op_at(sender, 6, STOP, &[word(0)], &[]);
    host.exit(&[], false);
    host.end_tx();
}

/// A precompile call synthesizes its formula from the recorded input and
/// output and pushes the success flag.
#[test]
fn sha256_precompile_synthesizes_formula() {
    let caller = addr(0xC1);
    let precompile = addr(0x02);
    let output = [0x5Au8; 32];

    // Seven pushes then CALL; returndata lands at memory[0..32).
    let code = [0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0xF1, 0x00];
    let mut host = Host::new();
    host.start_block();
    host.start_tx(caller, &[], &code);

    let target = U256::from_big_endian(precompile.as_bytes());
    for i in 0..7u64 {
        let stack: Vec<U256> = (0..i).map(|_| word(0)).collect();
        host.op_words(i, PUSH0, &stack, &[]);
    }
    // retSize=32, retOffset=0, inSize=4, inOffset=0, value=0, addr, gas.
    host.op_words(
        7,
        CALL,
        &[
            word(32),
            word(0),
            word(4),
            word(0),
            word(0),
            target,
            word(50_000),
        ],
        &[],
    );
    host.handler.on_enter(precompile, &[0, 0, 0, 0]);
    host.exit(&output, false);

    let state = host.handler.state().unwrap();
    let db = host.handler.db().clone();

    // Success flag on the stack.
    let top = *state.stack().unwrap().peek(0).unwrap();
    let flag = db.get_formula(top[31].formula).unwrap();
    assert_eq!(flag.opcode(), DepOp::CallResult);
    assert_eq!(flag.result().as_ref(), &[1u8]);

    // Returndata copied into caller memory references the digest node.
    let mem = state.memory().unwrap();
    let digest = db.get_formula(mem.data()[0].formula).unwrap();
    assert_eq!(digest.opcode(), DepOp::Sha256);
    assert_eq!(digest.result().as_ref(), &output);

    host.op(8, STOP, &[1], &[]);
    host.exit(&[], false);
    host.end_tx();
}

/// An unknown target producing output on exit is a protocol error.
#[test]
fn unknown_precompile_is_fatal() {
    let caller = addr(0xC2);
    let code = [0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0x5F, 0xF1, 0x00];
    let mut host = Host::new();
    host.start_block();
    host.start_tx(caller, &[], &code);

    let bogus = addr(0x7F);
    let target = U256::from_big_endian(bogus.as_bytes());
    for i in 0..7u64 {
        let stack: Vec<U256> = (0..i).map(|_| word(0)).collect();
        host.op_words(i, PUSH0, &stack, &[]);
    }
    host.op_words(
        7,
        CALL,
        &[
            word(0),
            word(0),
            word(0),
            word(0),
            word(0),
            target,
            word(50_000),
        ],
        &[],
    );
    host.handler.on_enter(bogus, &[]);

    let err = host.handler.on_exit(&[0xFF], false).unwrap_err();
    assert!(matches!(
        err,
        crate::errors::TracerError::UnknownPrecompile(_)
    ));
}

/// Overlapping blocks and nested transactions are protocol errors.
#[test]
fn lifecycle_guards() {
    let mut host = Host::new();
    host.start_block();
    assert!(host.handler.on_block_start(2, 0).is_err());

    host.start_tx(addr(0x01), &[], &[0x00]);
    let tx = crate::handler::TxStart {
        block_number: 1,
        timestamp: 0,
        origin: addr(0xEE),
        tx_hash: H256::zero(),
        is_create: false,
        address: addr(0x01),
        input: bytes::Bytes::new(),
        code: bytes::Bytes::new(),
        is_cancun: false,
        is_london: true,
    };
    assert!(host.handler.on_tx_start(tx, None).is_err());
}

/// MSTORE/MLOAD round-trip: the loaded word is byte-for-byte the stored
/// formula.
#[test]
fn mstore_mload_round_trip() {
    let contract = addr(0xD1);
    // PUSH0; CALLDATALOAD; PUSH0; MSTORE; PUSH0; MLOAD; JUMPDEST; STOP
    let code = [0x5F, 0x35, 0x5F, 0x52, 0x5F, 0x51, 0x5B, 0x00];
    let calldata = [0x77u8; 32];

    let mut host = Host::new();
    host.start_block();
    host.start_tx(contract, &calldata, &code);

    let value = U256::from_big_endian(&calldata);
    host.op(0, PUSH0, &[], &[]);
    host.op(1, CALLDATALOAD, &[0], &[]);
    host.op_words(2, PUSH0, &[value], &[]);
    host.op_words(3, MSTORE, &[value, word(0)], &[]);
    host.op(4, PUSH0, &[], &calldata);
    host.op(5, MLOAD, &[0], &calldata);
    host.op_words(6, JUMPDEST, &[value], &calldata);

    {
        let state = host.handler.state().unwrap();
        let db = host.handler.db().clone();
        let top = *state.stack().unwrap().peek(0).unwrap();
        let loaded = db.formula_dep(&top).unwrap();
        assert_eq!(loaded.opcode(), DepOp::CallData);
        assert_eq!(loaded.result().as_ref(), &calldata);
    }

    host.op_words(7, STOP, &[value], &calldata);
    host.exit(&[], false);
    host.end_tx();
}

/// A host-signaled opcode error closes the frame as reverted.
#[test]
fn host_error_reverts_frame() {
    let contract = addr(0xD2);
    let code = [0x60, 0x01, 0x5F, 0x55, 0xFE];

    let mut host = Host::new();
    host.start_block();
    host.start_tx(contract, &[], &code);

    host.op(0, PUSH1, &[], &[]);
    host.op(2, PUSH0, &[1], &[]);
    host.op(3, SSTORE, &[1, 0], &[]);
    // The next tick reports a host error: the write must vanish.
    let stack: Vec<U256> = Vec::new();
    host.handler
        .on_opcode(4, 0xFE, 1, &stack, &[], contract, true)
        .unwrap();
    host.exit(&[], true);
    host.end_tx();

    let db = host.handler.db().clone();
    assert_eq!(
        db.get_slot(contract, H256::zero()).unwrap(),
        init_dep_bytes(32)
    );
}

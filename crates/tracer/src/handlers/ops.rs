//! Semantic operations: one function per effect an opcode (or host event)
//! has on the shadowed state.
//!
//! The two-phase dispatcher in `handlers` captures host data and calls in
//! here, either immediately (`before`), on the next tick (`PendingOp`) or
//! at the matching host exit (`CallExit`).

use ethereum_types::{Address, H256, U256};

use crate::{
    depop::DepOp,
    errors::TracerError,
    formula::{formula_dep_bytes, overflow_slice},
    stack::{WORD_SIZE, address_bytes},
    transaction::TransactionDB,
};

pub(crate) fn to_usize(v: u64) -> Result<usize, TracerError> {
    usize::try_from(v).map_err(|_| TracerError::OffsetOverflow)
}

fn slot_key(v: &U256) -> H256 {
    H256(v.to_big_endian())
}

/// A host-signaled frame failure: close the frame as reverted or stopped.
pub fn data_error(state: &mut TransactionDB, reverted: bool) -> Result<(), TracerError> {
    if reverted {
        state.revert(Vec::new())
    } else {
        state.ret(Vec::new(), &[])
    }
}

/// PUSHn: the pushed word is bytes `pc+1 .. pc+1+n` of the executing code
/// shadow, zero-filled past the end. PUSH0 pushes only the padding.
pub fn push(state: &mut TransactionDB, pc: u64, size: u64) -> Result<(), TracerError> {
    if size == 0 {
        return state.stack_mut()?.push_n(&[]);
    }
    let code = state.code()?;
    let val = overflow_slice(&code, pc + 1, size);
    state.stack_mut()?.push_n(&val)
}

pub fn dup(state: &mut TransactionDB, n: usize) -> Result<(), TracerError> {
    state.stack_mut()?.dup(n)
}

pub fn swap(state: &mut TransactionDB, n: usize) -> Result<(), TracerError> {
    state.stack_mut()?.swap(n)
}

pub fn pop(state: &mut TransactionDB) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?;
    Ok(())
}

pub fn mload(state: &mut TransactionDB, offset: u64) -> Result<(), TracerError> {
    let offset = to_usize(offset)?;
    state.stack_mut()?.pop()?; // offset
    let val = state.memory_mut()?.load(offset, WORD_SIZE);
    state.stack_mut()?.push_n(&val)
}

pub fn mstore(state: &mut TransactionDB, offset: u64) -> Result<(), TracerError> {
    let offset = to_usize(offset)?;
    state.stack_mut()?.pop()?; // offset
    let value = state.stack_mut()?.pop()?;
    state.memory_mut()?.set_word(offset, &value);
    Ok(())
}

/// MSTORE8 stores byte 31 of the value word.
pub fn mstore8(state: &mut TransactionDB, offset: u64) -> Result<(), TracerError> {
    let offset = to_usize(offset)?;
    state.stack_mut()?.pop()?; // offset
    let value = state.stack_mut()?.pop()?;
    state.memory_mut()?.set(offset, value[WORD_SIZE - 1]);
    Ok(())
}

pub fn mcopy(
    state: &mut TransactionDB,
    to_offset: u64,
    from_offset: u64,
    size: u64,
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // toOffset
    stack.pop()?; // fromOffset
    stack.pop()?; // size

    let data = state
        .memory_mut()?
        .load(to_usize(from_offset)?, to_usize(size)?);
    state.memory_mut()?.set_n(to_usize(to_offset)?, &data);
    Ok(())
}

/// Environment/block values with no tracked inputs: a fresh constant.
pub fn constant(state: &mut TransactionDB, op: DepOp, value: &U256) -> Result<(), TracerError> {
    let formula = state.constant_new_with_shorts(op, value.to_big_endian().to_vec())?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// 20-byte variant for address-valued constants.
pub fn constant20(state: &mut TransactionDB, op: DepOp, value: &U256) -> Result<(), TracerError> {
    let bytes = value.to_big_endian();
    let formula = state.constant_new_with_shorts(op, bytes[12..].to_vec())?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn sload(state: &mut TransactionDB, slot: &U256, value: &U256) -> Result<(), TracerError> {
    let slot_word = state.stack_mut()?.pop()?;
    let slot_formula = state.formula_dep_with_shorts(&slot_word)?;

    let stored = state.get_slot(slot_key(slot))?;
    let value_formula = state.formula_dep_with_shorts(&stored)?;

    let formula = state.formula_new_with_shorts(
        DepOp::SLoad,
        value.to_big_endian().to_vec(),
        vec![value_formula.hash(), slot_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn sstore(state: &mut TransactionDB, slot: &U256, value: &U256) -> Result<(), TracerError> {
    let slot_word = state.stack_mut()?.pop()?;
    let slot_formula = state.formula_dep_with_shorts(&slot_word)?;

    let value_word = state.stack_mut()?.pop()?;
    let value_formula = state.formula_dep_with_shorts(&value_word)?;

    let formula = state.formula_new_with_shorts(
        DepOp::SStore,
        value.to_big_endian().to_vec(),
        vec![value_formula.hash(), slot_formula.hash()],
    )?;
    state.set_slot(slot_key(slot), formula_dep_bytes(&formula))
}

/// TLOAD pushes the stored shadow bytes back as-is — transient storage is
/// not wrapped in an addressable node.
pub fn tload(state: &mut TransactionDB, slot: &U256) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?; // slot
    let value = state.get_transient(slot_key(slot))?;
    state.stack_mut()?.push_n(&value)
}

pub fn tstore(state: &mut TransactionDB, slot: &U256) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?; // slot
    let value = state.stack_mut()?.pop()?;
    state.set_transient(slot_key(slot), value.to_vec())
}

/// Unary operator observed after execution.
pub fn one(state: &mut TransactionDB, op: DepOp, value: &U256) -> Result<(), TracerError> {
    let a = state.stack_mut()?.pop()?;
    let a_formula = state.formula_dep_with_shorts(&a)?;

    let formula = state.formula_new_with_shorts(
        op,
        value.to_big_endian().to_vec(),
        vec![a_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// Binary operator observed after execution.
pub fn two(state: &mut TransactionDB, op: DepOp, value: &U256) -> Result<(), TracerError> {
    let a = state.stack_mut()?.pop()?;
    let a_formula = state.formula_dep_with_shorts(&a)?;

    let b = state.stack_mut()?.pop()?;
    let b_formula = state.formula_dep_with_shorts(&b)?;

    let formula = state.formula_new_with_shorts(
        op,
        value.to_big_endian().to_vec(),
        vec![a_formula.hash(), b_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// Ternary operator observed after execution.
pub fn three(state: &mut TransactionDB, op: DepOp, value: &U256) -> Result<(), TracerError> {
    let a = state.stack_mut()?.pop()?;
    let a_formula = state.formula_dep_with_shorts(&a)?;

    let b = state.stack_mut()?.pop()?;
    let b_formula = state.formula_dep_with_shorts(&b)?;

    let c = state.stack_mut()?.pop()?;
    let c_formula = state.formula_dep_with_shorts(&c)?;

    let formula = state.formula_new_with_shorts(
        op,
        value.to_big_endian().to_vec(),
        vec![a_formula.hash(), b_formula.hash(), c_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// BYTE: a one-byte slice of the value word; offsets ≥ 32 read as zero.
pub fn byte_op(state: &mut TransactionDB, offset: &U256) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?; // offset
    let value = state.stack_mut()?.pop()?;

    let offset = if offset.bits() > 64 || offset.low_u64() >= 32 {
        32
    } else {
        offset.low_u64()
    };
    let val = overflow_slice(&value, offset, 1);
    state.stack_mut()?.push_n(&val)
}

pub fn keccak(
    state: &mut TransactionDB,
    offset: u64,
    size: u64,
    result: [u8; 32],
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // offset
    stack.pop()?; // size

    let data = state
        .memory_mut()?
        .load(to_usize(offset)?, to_usize(size)?);
    let data_formula = state.formula_dep_with_shorts(&data)?;
    let formula = state.formula_new_with_shorts(
        DepOp::Keccak,
        result.to_vec(),
        vec![data_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// CODESIZE: an 8-byte size node over the executing code shadow.
pub fn code_size(state: &mut TransactionDB, size: u64) -> Result<(), TracerError> {
    let code = state.code()?;
    let code_formula = state.formula_dep_with_shorts(&code)?;

    let formula = state.formula_new_with_shorts(
        DepOp::Size,
        size.to_be_bytes().to_vec(),
        vec![code_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// EXTCODESIZE: a 32-byte size node over the target's code and address.
pub fn ext_code_size(
    state: &mut TransactionDB,
    addr: Address,
    size: &U256,
) -> Result<(), TracerError> {
    let addr_word = state.stack_mut()?.pop()?;
    let addr_formula = state.formula_dep_with_shorts(&address_bytes(&addr_word))?;

    let code = state.get_code_shadow(addr)?;
    let code_formula = state.formula_dep_with_shorts(&code)?;

    let formula = state.formula_new_with_shorts(
        DepOp::CodeSize,
        size.to_big_endian().to_vec(),
        vec![code_formula.hash(), addr_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn ext_code_hash(
    state: &mut TransactionDB,
    addr: Address,
    hash: [u8; 32],
) -> Result<(), TracerError> {
    let addr_word = state.stack_mut()?.pop()?;
    let addr_formula = state.formula_dep_with_shorts(&address_bytes(&addr_word))?;

    let code = state.get_code_shadow(addr)?;
    let code_formula = state.formula_dep_with_shorts(&code)?;

    let formula = state.formula_new_with_shorts(
        DepOp::CodeKeccak,
        hash.to_vec(),
        vec![code_formula.hash(), addr_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn calldata_size(state: &mut TransactionDB, size: u64) -> Result<(), TracerError> {
    let calldata = state.calldata()?;
    let data_formula = state.formula_dep_with_shorts(&calldata)?;

    let formula = state.formula_new_with_shorts(
        DepOp::Size,
        size.to_be_bytes().to_vec(),
        vec![data_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn returndata_size(state: &mut TransactionDB, size: u64) -> Result<(), TracerError> {
    let returndata = state.returndata().to_vec();
    let data_formula = state.formula_dep_with_shorts(&returndata)?;

    let formula = state.formula_new_with_shorts(
        DepOp::Size,
        size.to_be_bytes().to_vec(),
        vec![data_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn code_copy(
    state: &mut TransactionDB,
    memory_offset: u64,
    code_offset: u64,
    length: u64,
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // memOffset
    stack.pop()?; // codeOffset
    stack.pop()?; // length

    let code = state.code()?;
    let val = overflow_slice(&code, code_offset, length);
    state.memory_mut()?.set_n(to_usize(memory_offset)?, &val);
    Ok(())
}

pub fn ext_code_copy(
    state: &mut TransactionDB,
    addr: Address,
    memory_offset: u64,
    code_offset: u64,
    length: u64,
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // addr
    stack.pop()?; // memOffset
    stack.pop()?; // codeOffset
    stack.pop()?; // length

    let code = state.get_code_shadow(addr)?;
    let val = overflow_slice(&code, code_offset, length);
    state.memory_mut()?.set_n(to_usize(memory_offset)?, &val);
    Ok(())
}

pub fn calldata_copy(
    state: &mut TransactionDB,
    memory_offset: u64,
    data_offset: u64,
    size: u64,
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // destOffset
    stack.pop()?; // offset
    stack.pop()?; // size

    let calldata = state.calldata()?;
    let val = overflow_slice(&calldata, data_offset, size);
    state.memory_mut()?.set_n(to_usize(memory_offset)?, &val);
    Ok(())
}

pub fn returndata_copy(
    state: &mut TransactionDB,
    memory_offset: u64,
    data_offset: u64,
    size: u64,
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // destOffset
    stack.pop()?; // offset
    stack.pop()?; // size

    let returndata = state.returndata().to_vec();
    let val = overflow_slice(&returndata, data_offset, size);
    state.memory_mut()?.set_n(to_usize(memory_offset)?, &val);
    Ok(())
}

pub fn calldata_load(state: &mut TransactionDB, offset: u64) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?; // offset
    let calldata = state.calldata()?;
    let val = overflow_slice(&calldata, offset, 32);
    state.stack_mut()?.push_n(&val)
}

pub fn log(
    state: &mut TransactionDB,
    offset: u64,
    size: u64,
    topics_num: usize,
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // offset
    stack.pop()?; // size

    let data = state
        .memory_mut()?
        .load(to_usize(offset)?, to_usize(size)?);
    let data_formula = state.formula_dep_with_shorts(&data)?;

    let mut topic_formulas = Vec::with_capacity(topics_num);
    for _ in 0..topics_num {
        let topic = state.stack_mut()?.pop()?;
        topic_formulas.push(state.formula_dep_with_shorts(&topic)?);
    }
    state.add_log(data_formula, topic_formulas)
}

pub fn ret_op(
    state: &mut TransactionDB,
    offset: u64,
    size: u64,
    result: &[u8],
) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // offset
    stack.pop()?; // size

    let val = state
        .memory_mut()?
        .load(to_usize(offset)?, to_usize(size)?);
    state.ret(val, result)
}

pub fn stop(state: &mut TransactionDB) -> Result<(), TracerError> {
    state.ret(Vec::new(), &[])
}

pub fn revert_op(state: &mut TransactionDB, offset: u64, size: u64) -> Result<(), TracerError> {
    let stack = state.stack_mut()?;
    stack.pop()?; // offset
    stack.pop()?; // size

    let val = state
        .memory_mut()?
        .load(to_usize(offset)?, to_usize(size)?);
    state.revert(val)
}

pub fn selfdestruct(state: &mut TransactionDB) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?; // beneficiary
    state.selfdestruct()
}

/// EIP-6780: only addresses created in this transaction are destructed;
/// otherwise the opcode degrades to a STOP.
pub fn selfdestruct_6780(state: &mut TransactionDB) -> Result<(), TracerError> {
    state.stack_mut()?.pop()?; // beneficiary
    if state.created(state.address()?) {
        state.selfdestruct()
    } else {
        state.ret(Vec::new(), &[])
    }
}

/// Pure stack-consuming opcodes (JUMP, JUMPI, JUMPDEST).
pub fn empty(state: &mut TransactionDB, n: usize) -> Result<(), TracerError> {
    for _ in 0..n {
        state.stack_mut()?.pop()?;
    }
    Ok(())
}

pub fn balance(state: &mut TransactionDB, value: &U256) -> Result<(), TracerError> {
    let balance_bytes = value.to_big_endian();
    let balance_const = state.constant_new_with_shorts(DepOp::Constant, balance_bytes.to_vec())?;

    let addr_word = state.stack_mut()?.pop()?;
    let addr_formula = state.formula_dep_with_shorts(&address_bytes(&addr_word))?;

    let formula = state.formula_new_with_shorts(
        DepOp::Balance,
        balance_bytes.to_vec(),
        vec![balance_const.hash(), addr_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn self_balance(state: &mut TransactionDB, value: &U256) -> Result<(), TracerError> {
    let balance_bytes = value.to_big_endian();
    let balance_const = state.constant_new_with_shorts(DepOp::Constant, balance_bytes.to_vec())?;

    let addr = state.address()?;
    let addr_const = state.constant_new_with_shorts(DepOp::Constant, addr.as_bytes().to_vec())?;

    let formula = state.formula_new_with_shorts(
        DepOp::Balance,
        balance_bytes.to_vec(),
        vec![balance_const.hash(), addr_const.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn block_hash(state: &mut TransactionDB, hash: [u8; 32]) -> Result<(), TracerError> {
    let hash_const = state.constant_new_with_shorts(DepOp::Constant, hash.to_vec())?;

    let number = state.stack_mut()?.pop()?;
    let number_formula = state.formula_dep_with_shorts(&number)?;

    let formula = state.formula_new_with_shorts(
        DepOp::BlockHash,
        hash.to_vec(),
        vec![hash_const.hash(), number_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

pub fn blob_hash(state: &mut TransactionDB, hash: [u8; 32]) -> Result<(), TracerError> {
    let hash_const = state.constant_new_with_shorts(DepOp::Constant, hash.to_vec())?;

    let index = state.stack_mut()?.pop()?;
    let index_formula = state.formula_dep_with_shorts(&index)?;

    let formula = state.formula_new_with_shorts(
        DepOp::BlobHash,
        hash.to_vec(),
        vec![hash_const.hash(), index_formula.hash()],
    )?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))
}

/// CREATE/CREATE2 entry: consume the arguments, snapshot the initcode out
/// of memory and open the create frame.
pub fn create_start(
    state: &mut TransactionDB,
    pops: usize,
    addr: Address,
    offset: u64,
    size: u64,
    initcode_bytes: &[u8],
) -> Result<(), TracerError> {
    for _ in 0..pops {
        state.stack_mut()?.pop()?;
    }
    let initcode = state
        .memory_mut()?
        .load(to_usize(offset)?, to_usize(size)?);
    state.create(addr, initcode, initcode_bytes)?;
    state.sync_logger_context()
}

/// CREATE/CREATE2 exit against the restored parent frame: the constructed
/// address lands on the stack, tagged with its derivation opcode.
pub fn create_end(state: &mut TransactionDB, op: DepOp, addr: Address) -> Result<(), TracerError> {
    let formula = state.constant_new_with_shorts(op, addr.as_bytes().to_vec())?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))?;
    state.sync_logger_context()
}

/// CALL-family entry: consume the arguments, slice the input out of memory
/// and open the callee frame.
pub fn call_start(
    state: &mut TransactionDB,
    pops: usize,
    addr: Address,
    code_addr: Address,
    in_offset: u64,
    in_size: u64,
) -> Result<(), TracerError> {
    for _ in 0..pops {
        state.stack_mut()?.pop()?;
    }
    let calldata = state
        .memory_mut()?
        .load(to_usize(in_offset)?, to_usize(in_size)?);
    state.call(addr, code_addr, calldata)?;
    state.sync_logger_context()
}

/// CALL-family exit: copy returndata into caller memory (zero-filled past
/// its end) and push the one-byte success flag.
pub fn call_end(
    state: &mut TransactionDB,
    success: bool,
    return_offset: u64,
    return_size: u64,
) -> Result<(), TracerError> {
    let data = overflow_slice(state.returndata(), 0, return_size);
    state.memory_mut()?.set_n(to_usize(return_offset)?, &data);

    let formula = state.constant_new_with_shorts(DepOp::CallResult, vec![u8::from(success)])?;
    state.stack_mut()?.push_n(&formula_dep_bytes(&formula))?;
    state.sync_logger_context()
}

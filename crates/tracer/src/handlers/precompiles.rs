//! Precompile handlers: synthesize output formulas from the recorded
//! enter/exit pair.
//!
//! No precompile is ever executed here — inputs and outputs are whatever
//! the host observed; the handlers only describe how the output bytes
//! derive from the calldata shadow.

use ethereum_types::{Address, U256};

use crate::{
    depop::DepOp,
    errors::TracerError,
    formula::{DepByte, INIT_ZERO, formula_dep_bytes, overflow_slice},
    transaction::TransactionDB,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precompile {
    EcRecover,
    Sha256,
    Ripemd160,
    Identity,
    ModExp,
    EcAdd,
    EcMul,
    EcPairing,
    Blake2F,
    PointEvaluation,
}

/// Precompile registered at `addr`, if any (addresses 0x01–0x0A).
pub fn precompile_for(addr: &Address) -> Option<Precompile> {
    let bytes = addr.as_bytes();
    if bytes[..19].iter().any(|b| *b != 0) {
        return None;
    }
    match bytes[19] {
        0x01 => Some(Precompile::EcRecover),
        0x02 => Some(Precompile::Sha256),
        0x03 => Some(Precompile::Ripemd160),
        0x04 => Some(Precompile::Identity),
        0x05 => Some(Precompile::ModExp),
        0x06 => Some(Precompile::EcAdd),
        0x07 => Some(Precompile::EcMul),
        0x08 => Some(Precompile::EcPairing),
        0x09 => Some(Precompile::Blake2F),
        0x0A => Some(Precompile::PointEvaluation),
        _ => None,
    }
}

/// Run the handler for a completed precompile call: build the output
/// shadow and terminate the precompile frame with it.
pub fn run_precompile(
    state: &mut TransactionDB,
    precompile: Precompile,
    input: &[u8],
    output: &[u8],
) -> Result<(), TracerError> {
    match precompile {
        Precompile::EcRecover => ec_recover(state, output),
        Precompile::Sha256 => sha256(state, output),
        Precompile::Ripemd160 => ripemd160(state, output),
        Precompile::Identity => identity(state, output),
        Precompile::ModExp => mod_exp(state, input, output),
        Precompile::EcAdd => ec_add(state, output),
        Precompile::EcMul => ec_mul(state, output),
        Precompile::EcPairing => ec_pairing(state, output),
        Precompile::Blake2F => blake2f(state, output),
        Precompile::PointEvaluation => point_evaluation(state, output),
    }
}

fn slice_formula(
    state: &mut TransactionDB,
    data: &[DepByte],
    offset: u64,
    size: u64,
) -> Result<ethereum_types::H256, TracerError> {
    let piece = overflow_slice(data, offset, size);
    Ok(state.formula_dep_with_shorts(&piece)?.hash())
}

/// Left-pad a 20-byte result formula to 32 bytes with implicit zeroes.
fn zero_padded_address(
    state: &mut TransactionDB,
    formula_hash: ethereum_types::H256,
    output: &[u8],
) -> Result<Vec<DepByte>, TracerError> {
    let mut operands = vec![INIT_ZERO.hash(); 12];
    operands.push(formula_hash);
    let val = state.formula_new_with_shorts(DepOp::Concat, output.to_vec(), operands)?;
    Ok(formula_dep_bytes(&val))
}

fn ec_recover(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    if output.is_empty() {
        return state.ret(Vec::new(), &[]);
    }
    let d = state.calldata()?;
    let hash = slice_formula(state, &d, 0, 32)?;
    let v = slice_formula(state, &d, 32, 32)?;
    let r = slice_formula(state, &d, 64, 32)?;
    let s = slice_formula(state, &d, 96, 32)?;

    let recovered = state.formula_new_with_shorts(
        DepOp::EcRecover,
        output[12..].to_vec(),
        vec![hash, v, r, s],
    )?;
    let val = zero_padded_address(state, recovered.hash(), output)?;
    state.ret(val, output)
}

fn sha256(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    let d = state.calldata()?;
    let data_formula = state.formula_dep_with_shorts(&d)?;
    let val = state.formula_new_with_shorts(
        DepOp::Sha256,
        output.to_vec(),
        vec![data_formula.hash()],
    )?;
    state.ret(formula_dep_bytes(&val), output)
}

fn ripemd160(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    let d = state.calldata()?;
    let data_formula = state.formula_dep_with_shorts(&d)?;
    let digest = state.formula_new_with_shorts(
        DepOp::Ripemd160,
        output.get(12..).unwrap_or_default().to_vec(),
        vec![data_formula.hash()],
    )?;
    let val = zero_padded_address(state, digest.hash(), output)?;
    state.ret(val, output)
}

fn identity(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    let d = state.calldata()?;
    state.ret(d, output)
}

fn mod_exp(state: &mut TransactionDB, input: &[u8], output: &[u8]) -> Result<(), TracerError> {
    if output.is_empty() {
        return state.ret(Vec::new(), &[]);
    }

    // Length prefix: three 32-byte big-endian fields, zero-padded reads.
    let length_at = |start: usize| {
        let mut buf = [0u8; 32];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = input.get(start + i).copied().unwrap_or(0);
        }
        U256::from_big_endian(&buf).low_u64()
    };
    let base_len = length_at(0);
    let exp_len = length_at(32);
    let mod_len = length_at(64);

    let d = state.calldata()?;
    let mut offset = 96u64;
    let base = slice_formula(state, &d, offset, base_len)?;
    offset += base_len;
    let exp = slice_formula(state, &d, offset, exp_len)?;
    offset += exp_len;
    let modulus = slice_formula(state, &d, offset, mod_len)?;

    let val = state.formula_new_with_shorts(
        DepOp::ModExp,
        output.to_vec(),
        vec![base, exp, modulus],
    )?;
    state.ret(formula_dep_bytes(&val), output)
}

fn ec_add(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    if output.len() < 64 {
        return state.ret(Vec::new(), &[]);
    }

    let d = state.calldata()?;
    let x1 = slice_formula(state, &d, 0, 32)?;
    let y1 = slice_formula(state, &d, 32, 32)?;
    let x2 = slice_formula(state, &d, 64, 32)?;
    let y2 = slice_formula(state, &d, 96, 32)?;

    let val_x = state.formula_new_with_shorts(
        DepOp::EcAddX,
        output[..32].to_vec(),
        vec![x1, y1, x2, y2],
    )?;
    let val_y = state.formula_new_with_shorts(
        DepOp::EcAddY,
        output[32..64].to_vec(),
        vec![x1, y1, x2, y2],
    )?;

    let mut val = formula_dep_bytes(&val_x);
    val.extend(formula_dep_bytes(&val_y));
    state.ret(val, output)
}

fn ec_mul(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    if output.len() < 64 {
        return state.ret(Vec::new(), &[]);
    }

    let d = state.calldata()?;
    let x1 = slice_formula(state, &d, 0, 32)?;
    let y1 = slice_formula(state, &d, 32, 32)?;
    let scalar = slice_formula(state, &d, 64, 32)?;

    let val_x = state.formula_new_with_shorts(
        DepOp::EcMulX,
        output[..32].to_vec(),
        vec![x1, y1, scalar],
    )?;
    let val_y = state.formula_new_with_shorts(
        DepOp::EcMulY,
        output[32..64].to_vec(),
        vec![x1, y1, scalar],
    )?;

    let mut val = formula_dep_bytes(&val_x);
    val.extend(formula_dep_bytes(&val_y));
    state.ret(val, output)
}

fn ec_pairing(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    if output.is_empty() {
        return state.ret(Vec::new(), &[]);
    }

    let d = state.calldata()?;
    let mut operands = Vec::new();
    let mut i = 0u64;
    // One G1/G2 point pair per 192-byte chunk.
    while i < d.len() as u64 {
        for offset in [0u64, 32, 64, 96, 128, 160] {
            operands.push(slice_formula(state, &d, i + offset, 32)?);
        }
        i += 192;
    }
    let val = state.formula_new_with_shorts(DepOp::EcPairing, output.to_vec(), operands)?;
    state.ret(formula_dep_bytes(&val), output)
}

fn blake2f(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    if output.is_empty() {
        return state.ret(Vec::new(), &[]);
    }

    let d = state.calldata()?;
    let rounds = slice_formula(state, &d, 0, 4)?;
    let h = slice_formula(state, &d, 4, 64)?;
    let m = slice_formula(state, &d, 68, 128)?;
    let t = slice_formula(state, &d, 196, 16)?;
    let f = slice_formula(state, &d, 212, 1)?;

    let val = state.formula_new_with_shorts(
        DepOp::Blake2F,
        output.to_vec(),
        vec![rounds, h, m, t, f],
    )?;
    state.ret(formula_dep_bytes(&val), output)
}

fn point_evaluation(state: &mut TransactionDB, output: &[u8]) -> Result<(), TracerError> {
    let d = state.calldata()?;
    let data_formula = state.formula_dep_with_shorts(&d)?;
    let val = state.formula_new_with_shorts(
        DepOp::PointEvaluation,
        output.to_vec(),
        vec![data_formula.hash()],
    )?;
    state.ret(formula_dep_bytes(&val), output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_dispatch() {
        let mut addr = Address::zero();
        addr.0[19] = 0x01;
        assert_eq!(precompile_for(&addr), Some(Precompile::EcRecover));
        addr.0[19] = 0x0A;
        assert_eq!(precompile_for(&addr), Some(Precompile::PointEvaluation));
        addr.0[19] = 0x0B;
        assert_eq!(precompile_for(&addr), None);
        addr.0[0] = 0x01;
        addr.0[19] = 0x01;
        assert_eq!(precompile_for(&addr), None);
    }
}

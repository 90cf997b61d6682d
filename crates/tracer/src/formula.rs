//! Content-addressed formula nodes and the per-byte shadow references.

use bytes::Bytes;
use ethereum_types::H256;
use lazy_static::lazy_static;
use sha2::{Digest, Sha256};

use crate::{depop::DepOp, errors::TracerError};

/// One node of the provenance DAG.
///
/// `result` is the concrete value the node evaluates to at trace time; its
/// length is fixed per opcode family (32 for a word, 20 for an address, N
/// for a blob). The hash covers `opcode ‖ result` for constants and
/// `opcode ‖ operand hashes` otherwise, so two zero constants with different
/// tags (`OPInitZero` vs `OPConstant`) are distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    opcode: DepOp,
    result: Bytes,
    operands: Vec<H256>,
    hash: H256,
}

impl Formula {
    pub fn constant(opcode: DepOp, result: impl Into<Bytes>) -> Self {
        Self::with_operands(opcode, result, Vec::new())
    }

    pub fn with_operands(opcode: DepOp, result: impl Into<Bytes>, operands: Vec<H256>) -> Self {
        let result = result.into();
        let hash = Self::compute_hash(opcode, &result, &operands);
        Self {
            opcode,
            result,
            operands,
            hash,
        }
    }

    fn compute_hash(opcode: DepOp, result: &[u8], operands: &[H256]) -> H256 {
        let mut hasher = Sha256::new();
        hasher.update([u8::from(opcode)]);
        if opcode.is_constant() {
            hasher.update(result);
        } else {
            for operand in operands {
                hasher.update(operand.as_bytes());
            }
        }
        H256(hasher.finalize().into())
    }

    pub fn opcode(&self) -> DepOp {
        self.opcode
    }

    pub fn result(&self) -> &Bytes {
        &self.result
    }

    pub fn operands(&self) -> &[H256] {
        &self.operands
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn is_constant(&self) -> bool {
        self.opcode.is_constant()
    }

    /// Binary layout: `opcode(1) ‖ be_u64(result len) ‖ result ‖
    /// be_u64(operand count) ‖ operand hashes`.
    pub fn to_bin(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(1 + 8 + self.result.len() + 8 + 32 * self.operands.len());
        out.push(u8::from(self.opcode));
        out.extend_from_slice(&(self.result.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.result);
        out.extend_from_slice(&(self.operands.len() as u64).to_be_bytes());
        for operand in &self.operands {
            out.extend_from_slice(operand.as_bytes());
        }
        out
    }

    pub fn from_bin(val: &[u8]) -> Result<Self, TracerError> {
        let corrupt = || TracerError::Corruption("truncated formula record".to_string());

        let (&op, rest) = val.split_first().ok_or_else(corrupt)?;
        let opcode = DepOp::try_from(op)?;

        let (len_bytes, rest) = rest.split_at_checked(8).ok_or_else(corrupt)?;
        let result_len = u64::from_be_bytes(len_bytes.try_into().map_err(|_| corrupt())?);
        let result_len = usize::try_from(result_len).map_err(|_| corrupt())?;
        let (result, rest) = rest.split_at_checked(result_len).ok_or_else(corrupt)?;

        let (count_bytes, mut rest) = rest.split_at_checked(8).ok_or_else(corrupt)?;
        let count = u64::from_be_bytes(count_bytes.try_into().map_err(|_| corrupt())?);

        let mut operands = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (hash, tail) = rest.split_at_checked(32).ok_or_else(corrupt)?;
            operands.push(H256::from_slice(hash));
            rest = tail;
        }

        Ok(Self::with_operands(
            opcode,
            Bytes::copy_from_slice(result),
            operands,
        ))
    }
}

lazy_static! {
    /// The "implicitly zero" byte: stack padding, untouched memory, absent
    /// storage slots.
    pub static ref INIT_ZERO: Formula = Formula::constant(DepOp::InitZero, vec![0u8]);
    /// The explicit zero literal. Distinct hash from `INIT_ZERO`.
    pub static ref CONST_ZERO: Formula = Formula::constant(DepOp::Constant, vec![0u8]);
}

/// One byte of a shadowed region: byte `pos` of `formula`'s result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepByte {
    pub pos: u64,
    pub formula: H256,
}

impl DepByte {
    pub fn init_zero() -> Self {
        Self {
            pos: 0,
            formula: INIT_ZERO.hash(),
        }
    }

    /// Binary layout: `be_u64(pos) ‖ formula hash`.
    pub fn to_bin(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(&self.pos.to_be_bytes());
        out.extend_from_slice(self.formula.as_bytes());
        out
    }

    pub fn from_bin(val: &[u8]) -> Result<Self, TracerError> {
        let corrupt = || TracerError::Corruption("truncated dep byte record".to_string());
        let (pos_bytes, hash) = val.split_at_checked(8).ok_or_else(corrupt)?;
        if hash.len() != 32 {
            return Err(corrupt());
        }
        Ok(Self {
            pos: u64::from_be_bytes(pos_bytes.try_into().map_err(|_| corrupt())?),
            formula: H256::from_slice(hash),
        })
    }
}

/// `size` bytes of implicit zero.
pub fn init_dep_bytes(size: usize) -> Vec<DepByte> {
    vec![DepByte::init_zero(); size]
}

/// The full result of `formula`, byte by byte.
pub fn formula_dep_bytes(formula: &Formula) -> Vec<DepByte> {
    let hash = formula.hash();
    (0..formula.result().len() as u64)
        .map(|pos| DepByte { pos, formula: hash })
        .collect()
}

/// Slice `[offset, offset + size)` out of `input`, filling everything past
/// the end with implicit zeroes. Out-of-range reads are never an error.
pub fn overflow_slice(input: &[DepByte], offset: u64, size: u64) -> Vec<DepByte> {
    let len = input.len() as u64;
    if offset >= len {
        return init_dep_bytes(size as usize);
    }
    let available = (len - offset).min(size);
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&input[offset as usize..(offset + available) as usize]);
    out.extend(init_dep_bytes((size - available) as usize));
    out
}

//! The backend opcode set: the vocabulary of the provenance DAG.
//!
//! These are not EVM opcodes. Each formula node is tagged with one of these,
//! and the tag decides how the node hashes (constants hash their result,
//! dynamic nodes hash their operand list) and how the shortener treats it.

use crate::errors::TracerError;

/// Formula node tag.
///
/// Three families:
/// - constants (`< 0xA0`): no operands, hash covers the literal result
/// - dynamic (`0xA0..0xE0`): hash covers the operand hashes
/// - addressable (`SLoad`/`SStore`): first operand is the value, second the
///   slot key; the shortener resolves reads through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DepOp {
    // Constants
    InitZero = 0x00,
    InitCode = 0x01,
    CallData = 0x02,
    Constant = 0x03,
    Coinbase = 0x04,
    Address = 0x05,
    Origin = 0x06,
    Caller = 0x07,
    CallValue = 0x08,
    GasPrice = 0x09,
    Timestamp = 0x0A,
    Number = 0x0B,
    Difficulty = 0x0C,
    Random = 0x0D,
    GasLimit = 0x0E,
    Pc = 0x0F,
    Msize = 0x10,
    Gas = 0x11,
    ChainId = 0x12,
    BaseFee = 0x13,
    CreateAddr = 0x14,
    Create2Addr = 0x15,
    CallResult = 0x16,
    BlobBaseFee = 0x17,

    // Dynamic
    Slice = 0xA0,
    Concat = 0xA1,
    Size = 0xA2,
    CodeSize = 0xA3,
    Add = 0xA4,
    Mul = 0xA5,
    Sub = 0xA6,
    Div = 0xA7,
    SDiv = 0xA8,
    Mod = 0xA9,
    SMod = 0xAA,
    Exp = 0xAB,
    SignExtend = 0xAC,
    Not = 0xAD,
    Lt = 0xAE,
    Gt = 0xAF,
    Slt = 0xB0,
    Sgt = 0xB1,
    Eq = 0xB2,
    Or = 0xB3,
    Xor = 0xB4,
    AddMod = 0xB5,
    MulMod = 0xB6,
    Shl = 0xB7,
    Shr = 0xB8,
    Sar = 0xB9,
    And = 0xBA,
    IsZero = 0xBB,
    Keccak = 0xBC,
    CodeKeccak = 0xBD,
    Balance = 0xBE,
    BlockHash = 0xBF,
    EcRecover = 0xC0,
    Sha256 = 0xC1,
    Ripemd160 = 0xC2,
    ModExp = 0xC3,
    EcAddX = 0xC4,
    EcAddY = 0xC5,
    EcMulX = 0xC6,
    EcMulY = 0xC7,
    EcPairing = 0xC8,
    Blake2F = 0xC9,
    BlobHash = 0xD0,
    PointEvaluation = 0xD1,

    // Addressable (1st operand: value, 2nd operand: slot key)
    SLoad = 0xE0,
    SStore = 0xE1,
}

impl DepOp {
    /// Constants carry no operands and hash by literal value.
    pub fn is_constant(&self) -> bool {
        (*self as u8) < 0xA0
    }

    /// Addressable opcodes read/write a named location; the shortener peels
    /// them down to the stored value when they appear as operands.
    pub fn is_addressable(&self) -> bool {
        matches!(self, DepOp::SLoad | DepOp::SStore)
    }

    /// Name used by the pretty printer, e.g. `OPKeccak`.
    pub fn name(&self) -> String {
        format!("OP{self:?}")
    }
}

impl From<DepOp> for u8 {
    fn from(op: DepOp) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for DepOp {
    type Error = TracerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use DepOp::*;
        let op = match value {
            0x00 => InitZero,
            0x01 => InitCode,
            0x02 => CallData,
            0x03 => Constant,
            0x04 => Coinbase,
            0x05 => Address,
            0x06 => Origin,
            0x07 => Caller,
            0x08 => CallValue,
            0x09 => GasPrice,
            0x0A => Timestamp,
            0x0B => Number,
            0x0C => Difficulty,
            0x0D => Random,
            0x0E => GasLimit,
            0x0F => Pc,
            0x10 => Msize,
            0x11 => Gas,
            0x12 => ChainId,
            0x13 => BaseFee,
            0x14 => CreateAddr,
            0x15 => Create2Addr,
            0x16 => CallResult,
            0x17 => BlobBaseFee,
            0xA0 => Slice,
            0xA1 => Concat,
            0xA2 => Size,
            0xA3 => CodeSize,
            0xA4 => Add,
            0xA5 => Mul,
            0xA6 => Sub,
            0xA7 => Div,
            0xA8 => SDiv,
            0xA9 => Mod,
            0xAA => SMod,
            0xAB => Exp,
            0xAC => SignExtend,
            0xAD => Not,
            0xAE => Lt,
            0xAF => Gt,
            0xB0 => Slt,
            0xB1 => Sgt,
            0xB2 => Eq,
            0xB3 => Or,
            0xB4 => Xor,
            0xB5 => AddMod,
            0xB6 => MulMod,
            0xB7 => Shl,
            0xB8 => Shr,
            0xB9 => Sar,
            0xBA => And,
            0xBB => IsZero,
            0xBC => Keccak,
            0xBD => CodeKeccak,
            0xBE => Balance,
            0xBF => BlockHash,
            0xC0 => EcRecover,
            0xC1 => Sha256,
            0xC2 => Ripemd160,
            0xC3 => ModExp,
            0xC4 => EcAddX,
            0xC5 => EcAddY,
            0xC6 => EcMulX,
            0xC7 => EcMulY,
            0xC8 => EcPairing,
            0xC9 => Blake2F,
            0xD0 => BlobHash,
            0xD1 => PointEvaluation,
            0xE0 => SLoad,
            0xE1 => SStore,
            other => {
                return Err(TracerError::Corruption(format!(
                    "unknown formula opcode 0x{other:02x}"
                )));
            }
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families() {
        assert!(DepOp::InitZero.is_constant());
        assert!(DepOp::BlobBaseFee.is_constant());
        assert!(!DepOp::Slice.is_constant());
        assert!(!DepOp::SStore.is_constant());
        assert!(DepOp::SLoad.is_addressable());
        assert!(DepOp::SStore.is_addressable());
        assert!(!DepOp::Keccak.is_addressable());
    }

    #[test]
    fn byte_round_trip() {
        for byte in 0u8..=0xFF {
            if let Ok(op) = DepOp::try_from(byte) {
                assert_eq!(u8::from(op), byte);
            }
        }
        assert_eq!(DepOp::try_from(0xBC).ok(), Some(DepOp::Keccak));
        assert!(DepOp::try_from(0x42).is_err());
    }

    #[test]
    fn printer_names() {
        assert_eq!(DepOp::InitZero.name(), "OPInitZero");
        assert_eq!(DepOp::Keccak.name(), "OPKeccak");
        assert_eq!(DepOp::SStore.name(), "OPSStore");
    }
}

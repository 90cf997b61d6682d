//! EVM opcode bytes the dispatcher matches on.
//!
//! Only the byte values and the range helpers the tracer needs: no gas or
//! fork metadata, since the tracer never executes anything.

// Stop and arithmetic
pub const STOP: u8 = 0x00;
pub const ADD: u8 = 0x01;
pub const MUL: u8 = 0x02;
pub const SUB: u8 = 0x03;
pub const DIV: u8 = 0x04;
pub const SDIV: u8 = 0x05;
pub const MOD: u8 = 0x06;
pub const SMOD: u8 = 0x07;
pub const ADDMOD: u8 = 0x08;
pub const MULMOD: u8 = 0x09;
pub const EXP: u8 = 0x0A;
pub const SIGNEXTEND: u8 = 0x0B;

// Comparison & bitwise logic
pub const LT: u8 = 0x10;
pub const GT: u8 = 0x11;
pub const SLT: u8 = 0x12;
pub const SGT: u8 = 0x13;
pub const EQ: u8 = 0x14;
pub const ISZERO: u8 = 0x15;
pub const AND: u8 = 0x16;
pub const OR: u8 = 0x17;
pub const XOR: u8 = 0x18;
pub const NOT: u8 = 0x19;
pub const BYTE: u8 = 0x1A;
pub const SHL: u8 = 0x1B;
pub const SHR: u8 = 0x1C;
pub const SAR: u8 = 0x1D;

// Crypto
pub const KECCAK256: u8 = 0x20;

// Environmental information
pub const ADDRESS: u8 = 0x30;
pub const BALANCE: u8 = 0x31;
pub const ORIGIN: u8 = 0x32;
pub const CALLER: u8 = 0x33;
pub const CALLVALUE: u8 = 0x34;
pub const CALLDATALOAD: u8 = 0x35;
pub const CALLDATASIZE: u8 = 0x36;
pub const CALLDATACOPY: u8 = 0x37;
pub const CODESIZE: u8 = 0x38;
pub const CODECOPY: u8 = 0x39;
pub const GASPRICE: u8 = 0x3A;
pub const EXTCODESIZE: u8 = 0x3B;
pub const EXTCODECOPY: u8 = 0x3C;
pub const RETURNDATASIZE: u8 = 0x3D;
pub const RETURNDATACOPY: u8 = 0x3E;
pub const EXTCODEHASH: u8 = 0x3F;

// Block information
pub const BLOCKHASH: u8 = 0x40;
pub const COINBASE: u8 = 0x41;
pub const TIMESTAMP: u8 = 0x42;
pub const NUMBER: u8 = 0x43;
pub const PREVRANDAO: u8 = 0x44;
pub const GASLIMIT: u8 = 0x45;
pub const CHAINID: u8 = 0x46;
pub const SELFBALANCE: u8 = 0x47;
pub const BASEFEE: u8 = 0x48;
pub const BLOBHASH: u8 = 0x49;
pub const BLOBBASEFEE: u8 = 0x4A;

// Stack, memory, storage and flow
pub const POP: u8 = 0x50;
pub const MLOAD: u8 = 0x51;
pub const MSTORE: u8 = 0x52;
pub const MSTORE8: u8 = 0x53;
pub const SLOAD: u8 = 0x54;
pub const SSTORE: u8 = 0x55;
pub const JUMP: u8 = 0x56;
pub const JUMPI: u8 = 0x57;
pub const PC: u8 = 0x58;
pub const MSIZE: u8 = 0x59;
pub const GAS: u8 = 0x5A;
pub const JUMPDEST: u8 = 0x5B;
pub const TLOAD: u8 = 0x5C;
pub const TSTORE: u8 = 0x5D;
pub const MCOPY: u8 = 0x5E;

// Pushes, dups, swaps, logs
pub const PUSH0: u8 = 0x5F;
pub const PUSH1: u8 = 0x60;
pub const PUSH32: u8 = 0x7F;
pub const DUP1: u8 = 0x80;
pub const DUP16: u8 = 0x8F;
pub const SWAP1: u8 = 0x90;
pub const SWAP16: u8 = 0x9F;
pub const LOG0: u8 = 0xA0;
pub const LOG4: u8 = 0xA4;

// System operations
pub const CREATE: u8 = 0xF0;
pub const CALL: u8 = 0xF1;
pub const CALLCODE: u8 = 0xF2;
pub const RETURN: u8 = 0xF3;
pub const DELEGATECALL: u8 = 0xF4;
pub const CREATE2: u8 = 0xF5;
pub const STATICCALL: u8 = 0xFA;
pub const REVERT: u8 = 0xFD;
pub const INVALID: u8 = 0xFE;
pub const SELFDESTRUCT: u8 = 0xFF;

/// PUSH0..=PUSH32 → number of immediate bytes (0..=32).
pub fn push_size(op: u8) -> Option<u64> {
    (PUSH0..=PUSH32).contains(&op).then(|| u64::from(op - PUSH0))
}

/// DUP1..=DUP16 → depth (1..=16).
pub fn dup_depth(op: u8) -> Option<usize> {
    (DUP1..=DUP16).contains(&op).then(|| 1 + usize::from(op - DUP1))
}

/// SWAP1..=SWAP16 → depth (2..=17): the stack slot swapped with the top.
pub fn swap_depth(op: u8) -> Option<usize> {
    (SWAP1..=SWAP16).contains(&op).then(|| 2 + usize::from(op - SWAP1))
}

/// LOG0..=LOG4 → topic count (0..=4).
pub fn log_topics(op: u8) -> Option<usize> {
    (LOG0..=LOG4).contains(&op).then(|| usize::from(op - LOG0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_helpers() {
        assert_eq!(push_size(PUSH0), Some(0));
        assert_eq!(push_size(PUSH1), Some(1));
        assert_eq!(push_size(PUSH32), Some(32));
        assert_eq!(push_size(DUP1), None);

        assert_eq!(dup_depth(DUP1), Some(1));
        assert_eq!(dup_depth(DUP16), Some(16));

        assert_eq!(swap_depth(SWAP1), Some(2));
        assert_eq!(swap_depth(SWAP16), Some(17));

        assert_eq!(log_topics(LOG0), Some(0));
        assert_eq!(log_topics(LOG4), Some(4));
        assert_eq!(log_topics(0xA5), None);
    }
}

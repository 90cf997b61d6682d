//! Two-phase opcode dispatch.
//!
//! The host delivers stack state *before* each opcode, so an opcode's
//! result is only observable at the next tick. `before_opcode` captures
//! whatever the pre-state offers and returns a [`Step`]:
//!
//! - [`Step::Pending`]: the small captured state waits in the dispatcher
//!   and completes against the next tick's stack
//! - [`Step::Return`]: the frame terminated; the host exit that follows
//!   only runs the deferred call-exit tail
//! - [`Step::Call`]: a sub-call opened; the matching exit record is pushed
//!   onto the dispatcher's call-return stack

pub mod ops;
pub mod precompiles;

use ethereum_types::{Address, H256, U256};

use crate::{
    crypto::{create2_address, create_address, keccak256},
    depop::DepOp,
    errors::TracerError,
    opcodes,
    transaction::TransactionDB,
};

/// Host-provided context for one opcode tick.
pub struct OpcodeEnv<'a> {
    pub pc: u64,
    pub op: u8,
    /// Host stack, bottom to top.
    pub stack: &'a [U256],
    /// Raw host memory of the executing frame.
    pub memory: &'a [u8],
    /// Address of the executing contract.
    pub contract_addr: Address,
    pub is_cancun: bool,
    pub is_london: bool,
}

impl OpcodeEnv<'_> {
    /// `depth`-th word from the top of the host stack.
    fn peek(&self, depth: usize) -> Result<&U256, TracerError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or(TracerError::HostStackUnderflow)
    }

    fn peek_u64(&self, depth: usize) -> Result<u64, TracerError> {
        Ok(self.peek(depth)?.low_u64())
    }

    /// Saturating u64 read for copy-source offsets: an absurd offset still
    /// has to produce an all-zero read, not wrap around.
    fn peek_u64_saturating(&self, depth: usize) -> Result<u64, TracerError> {
        let v = self.peek(depth)?;
        Ok(if v.bits() > 64 { u64::MAX } else { v.low_u64() })
    }

    fn peek_address(&self, depth: usize) -> Result<Address, TracerError> {
        let bytes = self.peek(depth)?.to_big_endian();
        Ok(Address::from_slice(&bytes[12..]))
    }

    /// `memory[offset .. offset+size]`, zero-filled past the end.
    fn memory_slice(&self, offset: u64, size: u64) -> Vec<u8> {
        let len = self.memory.len() as u64;
        let start = offset.min(len);
        let end = offset.saturating_add(size).min(len);
        let mut out = self.memory[start as usize..end as usize].to_vec();
        out.resize(size as usize, 0);
        out
    }
}

/// Deferred completion of an opcode, run against the next tick's stack.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Push { pc: u64, size: u64 },
    Dup { n: usize },
    Swap { n: usize },
    Pop,
    Empty { n: usize },
    MLoad { offset: u64 },
    MStore { offset: u64 },
    MStore8 { offset: u64 },
    MCopy { to_offset: u64, from_offset: u64, size: u64 },
    Constant { op: DepOp },
    Constant20 { op: DepOp },
    One { op: DepOp },
    Two { op: DepOp },
    Three { op: DepOp },
    Byte { offset: U256 },
    Keccak { offset: u64, size: u64 },
    SLoad { slot: U256 },
    SStore { slot: U256, value: U256 },
    TLoad { slot: U256 },
    TStore { slot: U256 },
    CodeSize,
    ExtCodeSize { addr: Address },
    ExtCodeHash { addr: Address },
    CalldataSize,
    ReturndataSize,
    CalldataLoad { offset: u64 },
    CodeCopy { memory_offset: u64, code_offset: u64, length: u64 },
    ExtCodeCopy { addr: Address, memory_offset: u64, code_offset: u64, length: u64 },
    CalldataCopy { memory_offset: u64, data_offset: u64, size: u64 },
    ReturndataCopy { memory_offset: u64, data_offset: u64, size: u64 },
    Balance,
    SelfBalance,
    BlockHash,
    BlobHash,
    Log { offset: u64, size: u64, topics: usize },
}

fn post_top(stack: &[U256]) -> Result<&U256, TracerError> {
    stack.last().ok_or(TracerError::HostStackUnderflow)
}

impl PendingOp {
    /// Complete against the post-execution stack (the next tick's
    /// pre-stack).
    pub fn complete(
        self,
        state: &mut TransactionDB,
        stack: &[U256],
    ) -> Result<(), TracerError> {
        match self {
            PendingOp::Push { pc, size } => ops::push(state, pc, size),
            PendingOp::Dup { n } => ops::dup(state, n),
            PendingOp::Swap { n } => ops::swap(state, n),
            PendingOp::Pop => ops::pop(state),
            PendingOp::Empty { n } => ops::empty(state, n),
            PendingOp::MLoad { offset } => ops::mload(state, offset),
            PendingOp::MStore { offset } => ops::mstore(state, offset),
            PendingOp::MStore8 { offset } => ops::mstore8(state, offset),
            PendingOp::MCopy {
                to_offset,
                from_offset,
                size,
            } => ops::mcopy(state, to_offset, from_offset, size),
            PendingOp::Constant { op } => ops::constant(state, op, post_top(stack)?),
            PendingOp::Constant20 { op } => ops::constant20(state, op, post_top(stack)?),
            PendingOp::One { op } => ops::one(state, op, post_top(stack)?),
            PendingOp::Two { op } => ops::two(state, op, post_top(stack)?),
            PendingOp::Three { op } => ops::three(state, op, post_top(stack)?),
            PendingOp::Byte { offset } => ops::byte_op(state, &offset),
            PendingOp::Keccak { offset, size } => {
                ops::keccak(state, offset, size, post_top(stack)?.to_big_endian())
            }
            PendingOp::SLoad { slot } => ops::sload(state, &slot, post_top(stack)?),
            PendingOp::SStore { slot, value } => ops::sstore(state, &slot, &value),
            PendingOp::TLoad { slot } => ops::tload(state, &slot),
            PendingOp::TStore { slot } => ops::tstore(state, &slot),
            PendingOp::CodeSize => ops::code_size(state, post_top(stack)?.low_u64()),
            PendingOp::ExtCodeSize { addr } => ops::ext_code_size(state, addr, post_top(stack)?),
            PendingOp::ExtCodeHash { addr } => {
                ops::ext_code_hash(state, addr, post_top(stack)?.to_big_endian())
            }
            PendingOp::CalldataSize => ops::calldata_size(state, post_top(stack)?.low_u64()),
            PendingOp::ReturndataSize => {
                ops::returndata_size(state, post_top(stack)?.low_u64())
            }
            PendingOp::CalldataLoad { offset } => ops::calldata_load(state, offset),
            PendingOp::CodeCopy {
                memory_offset,
                code_offset,
                length,
            } => ops::code_copy(state, memory_offset, code_offset, length),
            PendingOp::ExtCodeCopy {
                addr,
                memory_offset,
                code_offset,
                length,
            } => ops::ext_code_copy(state, addr, memory_offset, code_offset, length),
            PendingOp::CalldataCopy {
                memory_offset,
                data_offset,
                size,
            } => ops::calldata_copy(state, memory_offset, data_offset, size),
            PendingOp::ReturndataCopy {
                memory_offset,
                data_offset,
                size,
            } => ops::returndata_copy(state, memory_offset, data_offset, size),
            PendingOp::Balance => ops::balance(state, post_top(stack)?),
            PendingOp::SelfBalance => ops::self_balance(state, post_top(stack)?),
            PendingOp::BlockHash => ops::block_hash(state, post_top(stack)?.to_big_endian()),
            PendingOp::BlobHash => ops::blob_hash(state, post_top(stack)?.to_big_endian()),
            PendingOp::Log {
                offset,
                size,
                topics,
            } => ops::log(state, offset, size, topics),
        }
    }
}

/// Deferred end of a sub-call, run at the matching host exit against the
/// restored parent frame.
#[derive(Debug, Clone)]
pub enum CallExit {
    Call { return_offset: u64, return_size: u64 },
    Create { address: Address },
    Create2 { address: Address },
}

impl CallExit {
    pub fn complete(self, state: &mut TransactionDB, success: bool) -> Result<(), TracerError> {
        match self {
            CallExit::Call {
                return_offset,
                return_size,
            } => ops::call_end(state, success, return_offset, return_size),
            CallExit::Create { address } => ops::create_end(state, DepOp::CreateAddr, address),
            CallExit::Create2 { address } => ops::create_end(state, DepOp::Create2Addr, address),
        }
    }
}

/// Dispatcher verdict for one opcode tick.
#[derive(Debug)]
pub enum Step {
    Pending(PendingOp),
    Return,
    Call(CallExit),
}

/// Phase one of an opcode: capture pre-state, apply immediate effects for
/// terminal and call opcodes, and say how the tick continues.
pub fn before_opcode(state: &mut TransactionDB, env: &OpcodeEnv<'_>) -> Result<Step, TracerError> {
    use crate::opcodes::*;

    let pending = |p: PendingOp| Ok(Step::Pending(p));

    match env.op {
        STOP => {
            ops::stop(state)?;
            Ok(Step::Return)
        }

        ADD => pending(PendingOp::Two { op: DepOp::Add }),
        MUL => pending(PendingOp::Two { op: DepOp::Mul }),
        SUB => pending(PendingOp::Two { op: DepOp::Sub }),
        DIV => pending(PendingOp::Two { op: DepOp::Div }),
        SDIV => pending(PendingOp::Two { op: DepOp::SDiv }),
        MOD => pending(PendingOp::Two { op: DepOp::Mod }),
        SMOD => pending(PendingOp::Two { op: DepOp::SMod }),
        ADDMOD => pending(PendingOp::Three { op: DepOp::AddMod }),
        MULMOD => pending(PendingOp::Three { op: DepOp::MulMod }),
        EXP => pending(PendingOp::Two { op: DepOp::Exp }),
        SIGNEXTEND => pending(PendingOp::Two { op: DepOp::SignExtend }),

        LT => pending(PendingOp::Two { op: DepOp::Lt }),
        GT => pending(PendingOp::Two { op: DepOp::Gt }),
        SLT => pending(PendingOp::Two { op: DepOp::Slt }),
        SGT => pending(PendingOp::Two { op: DepOp::Sgt }),
        EQ => pending(PendingOp::Two { op: DepOp::Eq }),
        ISZERO => pending(PendingOp::One { op: DepOp::IsZero }),
        AND => pending(PendingOp::Two { op: DepOp::And }),
        OR => pending(PendingOp::Two { op: DepOp::Or }),
        XOR => pending(PendingOp::Two { op: DepOp::Xor }),
        NOT => pending(PendingOp::One { op: DepOp::Not }),
        BYTE => pending(PendingOp::Byte {
            offset: *env.peek(0)?,
        }),
        SHL => pending(PendingOp::Two { op: DepOp::Shl }),
        SHR => pending(PendingOp::Two { op: DepOp::Shr }),
        SAR => pending(PendingOp::Two { op: DepOp::Sar }),

        KECCAK256 => pending(PendingOp::Keccak {
            offset: env.peek_u64(0)?,
            size: env.peek_u64(1)?,
        }),

        ADDRESS => pending(PendingOp::Constant20 { op: DepOp::Address }),
        BALANCE => pending(PendingOp::Balance),
        ORIGIN => pending(PendingOp::Constant20 { op: DepOp::Origin }),
        CALLER => pending(PendingOp::Constant20 { op: DepOp::Caller }),
        CALLVALUE => pending(PendingOp::Constant { op: DepOp::CallValue }),
        CALLDATALOAD => pending(PendingOp::CalldataLoad {
            offset: env.peek_u64_saturating(0)?,
        }),
        CALLDATASIZE => pending(PendingOp::CalldataSize),
        CALLDATACOPY => pending(PendingOp::CalldataCopy {
            memory_offset: env.peek_u64(0)?,
            data_offset: env.peek_u64_saturating(1)?,
            size: env.peek_u64(2)?,
        }),
        CODESIZE => pending(PendingOp::CodeSize),
        CODECOPY => pending(PendingOp::CodeCopy {
            memory_offset: env.peek_u64(0)?,
            code_offset: env.peek_u64_saturating(1)?,
            length: env.peek_u64(2)?,
        }),
        GASPRICE => pending(PendingOp::Constant { op: DepOp::GasPrice }),
        EXTCODESIZE => pending(PendingOp::ExtCodeSize {
            addr: env.peek_address(0)?,
        }),
        EXTCODECOPY => pending(PendingOp::ExtCodeCopy {
            addr: env.peek_address(0)?,
            memory_offset: env.peek_u64(1)?,
            code_offset: env.peek_u64_saturating(2)?,
            length: env.peek_u64(3)?,
        }),
        RETURNDATASIZE => pending(PendingOp::ReturndataSize),
        RETURNDATACOPY => pending(PendingOp::ReturndataCopy {
            memory_offset: env.peek_u64(0)?,
            data_offset: env.peek_u64(1)?,
            size: env.peek_u64(2)?,
        }),
        EXTCODEHASH => pending(PendingOp::ExtCodeHash {
            addr: env.peek_address(0)?,
        }),

        BLOCKHASH => pending(PendingOp::BlockHash),
        COINBASE => pending(PendingOp::Constant20 { op: DepOp::Coinbase }),
        TIMESTAMP => pending(PendingOp::Constant { op: DepOp::Timestamp }),
        NUMBER => pending(PendingOp::Constant { op: DepOp::Number }),
        PREVRANDAO => pending(PendingOp::Constant {
            op: if env.is_london {
                DepOp::Random
            } else {
                DepOp::Difficulty
            },
        }),
        GASLIMIT => pending(PendingOp::Constant { op: DepOp::GasLimit }),
        CHAINID => pending(PendingOp::Constant { op: DepOp::ChainId }),
        SELFBALANCE => pending(PendingOp::SelfBalance),
        BASEFEE => pending(PendingOp::Constant { op: DepOp::BaseFee }),
        BLOBHASH => pending(PendingOp::BlobHash),
        BLOBBASEFEE => pending(PendingOp::Constant { op: DepOp::BlobBaseFee }),

        POP => pending(PendingOp::Pop),
        MLOAD => pending(PendingOp::MLoad {
            offset: env.peek_u64(0)?,
        }),
        MSTORE => pending(PendingOp::MStore {
            offset: env.peek_u64(0)?,
        }),
        MSTORE8 => pending(PendingOp::MStore8 {
            offset: env.peek_u64(0)?,
        }),
        SLOAD => pending(PendingOp::SLoad {
            slot: *env.peek(0)?,
        }),
        SSTORE => pending(PendingOp::SStore {
            slot: *env.peek(0)?,
            value: *env.peek(1)?,
        }),
        JUMP => pending(PendingOp::Empty { n: 1 }),
        JUMPI => pending(PendingOp::Empty { n: 2 }),
        PC => pending(PendingOp::Constant { op: DepOp::Pc }),
        MSIZE => pending(PendingOp::Constant { op: DepOp::Msize }),
        GAS => pending(PendingOp::Constant { op: DepOp::Gas }),
        JUMPDEST => pending(PendingOp::Empty { n: 0 }),
        TLOAD => pending(PendingOp::TLoad {
            slot: *env.peek(0)?,
        }),
        TSTORE => pending(PendingOp::TStore {
            slot: *env.peek(0)?,
        }),
        MCOPY => pending(PendingOp::MCopy {
            to_offset: env.peek_u64(0)?,
            from_offset: env.peek_u64(1)?,
            size: env.peek_u64(2)?,
        }),

        op if opcodes::push_size(op).is_some() => {
            let size = opcodes::push_size(op).unwrap_or(0);
            pending(PendingOp::Push { pc: env.pc, size })
        }
        op if opcodes::dup_depth(op).is_some() => {
            let n = opcodes::dup_depth(op).unwrap_or(1);
            pending(PendingOp::Dup { n })
        }
        op if opcodes::swap_depth(op).is_some() => {
            let n = opcodes::swap_depth(op).unwrap_or(2);
            pending(PendingOp::Swap { n })
        }
        op if opcodes::log_topics(op).is_some() => {
            let topics = opcodes::log_topics(op).unwrap_or(0);
            pending(PendingOp::Log {
                offset: env.peek_u64(0)?,
                size: env.peek_u64(1)?,
                topics,
            })
        }

        CREATE => {
            let reader = state
                .state_reader()
                .ok_or(TracerError::MissingStateReader)?;
            let nonce = reader.get_nonce(env.contract_addr);
            let addr = create_address(env.contract_addr, nonce);

            let offset = env.peek_u64(1)?;
            let size = env.peek_u64(2)?;
            let initcode = env.memory_slice(offset, size);

            ops::create_start(state, 3, addr, offset, size, &initcode)?;
            Ok(Step::Call(CallExit::Create { address: addr }))
        }
        CREATE2 => {
            let offset = env.peek_u64(1)?;
            let size = env.peek_u64(2)?;
            let initcode = env.memory_slice(offset, size);

            let salt = H256(env.peek(3)?.to_big_endian());
            let addr = create2_address(env.contract_addr, salt, keccak256(&[&initcode]));

            ops::create_start(state, 4, addr, offset, size, &initcode)?;
            Ok(Step::Call(CallExit::Create2 { address: addr }))
        }

        CALL => {
            let addr = env.peek_address(1)?;
            ops::call_start(state, 7, addr, addr, env.peek_u64(3)?, env.peek_u64(4)?)?;
            Ok(Step::Call(CallExit::Call {
                return_offset: env.peek_u64(5)?,
                return_size: env.peek_u64(6)?,
            }))
        }
        CALLCODE => {
            // Executes foreign code against the caller's own storage.
            ops::call_start(
                state,
                7,
                env.contract_addr,
                env.peek_address(1)?,
                env.peek_u64(3)?,
                env.peek_u64(4)?,
            )?;
            Ok(Step::Call(CallExit::Call {
                return_offset: env.peek_u64(5)?,
                return_size: env.peek_u64(6)?,
            }))
        }
        DELEGATECALL => {
            ops::call_start(
                state,
                6,
                env.contract_addr,
                env.peek_address(1)?,
                env.peek_u64(2)?,
                env.peek_u64(3)?,
            )?;
            Ok(Step::Call(CallExit::Call {
                return_offset: env.peek_u64(4)?,
                return_size: env.peek_u64(5)?,
            }))
        }
        STATICCALL => {
            let addr = env.peek_address(1)?;
            ops::call_start(state, 6, addr, addr, env.peek_u64(2)?, env.peek_u64(3)?)?;
            Ok(Step::Call(CallExit::Call {
                return_offset: env.peek_u64(4)?,
                return_size: env.peek_u64(5)?,
            }))
        }

        RETURN => {
            let offset = env.peek_u64(0)?;
            let size = env.peek_u64(1)?;
            let result = env.memory_slice(offset, size);
            ops::ret_op(state, offset, size, &result)?;
            Ok(Step::Return)
        }
        REVERT => {
            ops::revert_op(state, env.peek_u64(0)?, env.peek_u64(1)?)?;
            Ok(Step::Return)
        }
        SELFDESTRUCT => {
            if env.is_cancun {
                ops::selfdestruct_6780(state)?;
            } else {
                ops::selfdestruct(state)?;
            }
            Ok(Step::Return)
        }

        op => Err(TracerError::UnknownOpcode(op)),
    }
}

//! Error types for the tracer core.
//!
//! Everything here is fatal for the trace in progress: configuration errors
//! abort construction, protocol errors mean the host violated the callback
//! contract, and store errors mean trace integrity is already lost.
//! Host-signaled EVM failures are *not* errors — they are folded into the
//! formula stream as reverted frames.

use ethereum_types::Address;
use provex_kv::KvError;

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("Unknown precompile {0:?}")]
    UnknownPrecompile(Address),

    #[error("Block already open")]
    OverlappingBlock,

    #[error("Transaction already open")]
    NestedTransaction,

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Host stack too short for the current opcode")]
    HostStackUnderflow,

    #[error("State reader required but not provided")]
    MissingStateReader,

    #[error("Shadow stack underflow")]
    ShadowStackUnderflow,

    #[error("Cannot push more than 32 bytes onto the shadow stack")]
    ShadowStackOverflow,

    #[error("No active call frame")]
    MissingFrame,

    #[error("Offset out of addressable range")]
    OffsetOverflow,

    #[error("Store corruption: {0}")]
    Corruption(String),

    #[error("Kv error: {0}")]
    Kv(#[from] KvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

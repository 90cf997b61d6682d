//! # provex-tracer
//!
//! A byte-level provenance tracer for the EVM. The tracer observes a host's
//! opcode/enter/exit/fault callbacks and mirrors every stack word, memory
//! byte, storage slot, code byte and returndata byte with a reference into
//! a content-addressed formula DAG — recording which opcodes and which
//! inputs (calldata, code, storage, precompile outputs, block context)
//! produced each byte.
//!
//! ## Architecture
//!
//! ```text
//! host callbacks ─▶ DepHandler ─▶ opcode dispatch ─▶ TransactionDB
//!                                                     │        │
//!                                        shadows ◀────┘        └───▶ OverlayDB
//!                                  (stack/memory)                       │
//!                                                                        ▼
//!                                             SimpleDB (formulas, slots, codes)
//!                                                  │                    │
//!                                               Logger ───▶ OutputWriter│
//!                                                                        ▼
//!                                                                  provex-kv
//! ```
//!
//! The tracer never executes EVM semantics: concrete values always come
//! from the host, the tracer only explains where they came from.

pub mod config;
pub mod crypto;
pub mod depop;
pub mod errors;
pub mod formula;
pub mod frame;
pub mod handler;
pub mod handlers;
pub mod logger;
pub mod memory;
pub mod opcodes;
pub mod output;
pub mod overlay;
pub mod shortener;
pub mod simple_db;
pub mod sol_view;
pub mod stack;
pub mod transaction;

pub use config::TracerConfig;
pub use errors::TracerError;
pub use handler::{DepHandler, StateReader, TxStart};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests;

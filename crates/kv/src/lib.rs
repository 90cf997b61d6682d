//! Pluggable key/value engines for the provex tracer.
//!
//! The tracer persists formulas, slot shadows, code shadows and address
//! versions through a narrow table-oriented interface. Four engines are
//! provided:
//!
//! - `rocksdb`: on-disk LSM store, one column family per table
//! - `memory`: in-memory store living for the process lifetime
//! - `amnesia`: in-memory store that discards every write
//! - `remote`: HTTP key/value service, one bucket per table
//!
//! All table names must be known when the store is opened.

mod engine;
mod error;
mod in_memory;
mod remote;
mod rocks;

pub use engine::{EngineKind, KvEngine, KvStore, Table};
pub use error::KvError;

//! Shared fixtures: an in-memory tracer with a capturing output sink and a
//! thin host-simulation layer.

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};

use crate::{
    config::TracerConfig,
    handler::{DepHandler, TxStart},
    logger::LoggerConfig,
    output::OutputWriter,
    shortener::ProtectedSet,
    simple_db::SimpleDB,
};
use provex_kv::EngineKind;

/// Collected output lines, shared with the writer handed to the tracer.
pub type Captured = Rc<RefCell<String>>;

pub fn capture_writer() -> (Rc<OutputWriter>, Captured) {
    let captured: Captured = Rc::new(RefCell::new(String::new()));
    let sink = captured.clone();
    let writer = Rc::new(OutputWriter::callback(move |s| {
        sink.borrow_mut().push_str(s)
    }));
    (writer, captured)
}

/// A fresh in-memory store with the crypto policy and default logging.
pub fn memory_db() -> (Rc<SimpleDB>, Captured) {
    let (writer, captured) = capture_writer();
    let db = SimpleDB::open(
        vec![ProtectedSet::crypto()],
        LoggerConfig::default_selection(),
        EngineKind::Memory,
        "",
        writer,
    )
    .unwrap();
    (Rc::new(db), captured)
}

pub fn addr(n: u8) -> Address {
    let mut a = Address::zero();
    a.0[19] = n;
    a
}

/// A host driving one tracer over an in-memory store.
pub struct Host {
    pub handler: DepHandler,
    pub captured: Captured,
}

impl Host {
    pub fn new() -> Self {
        let (writer, captured) = capture_writer();
        let handler = DepHandler::with_writer(TracerConfig::in_memory(), writer).unwrap();
        Self { handler, captured }
    }

    pub fn start_block(&mut self) {
        self.handler.on_block_start(1, 1_700_000_000).unwrap();
    }

    /// Begin a call transaction to `to` running `code`.
    pub fn start_tx(&mut self, to: Address, calldata: &[u8], code: &[u8]) {
        self.start_tx_with_forks(to, calldata, code, false);
    }

    pub fn start_tx_with_forks(&mut self, to: Address, calldata: &[u8], code: &[u8], cancun: bool) {
        let tx = TxStart {
            block_number: 1,
            timestamp: 1_700_000_000,
            origin: addr(0xEE),
            tx_hash: H256::repeat_byte(0x11),
            is_create: false,
            address: to,
            input: Bytes::copy_from_slice(calldata),
            code: Bytes::copy_from_slice(code),
            is_cancun: cancun,
            is_london: true,
        };
        self.handler.on_tx_start(tx, None).unwrap();
    }

    /// One opcode tick. `stack` is bottom-to-top, as the host delivers it.
    pub fn op(&mut self, pc: u64, op: u8, stack: &[u64], memory: &[u8]) {
        let stack: Vec<U256> = stack.iter().map(|v| U256::from(*v)).collect();
        self.handler
            .on_opcode(pc, op, 1, &stack, memory, addr(0xAA), false)
            .unwrap();
    }

    /// Opcode tick with full-width stack words.
    pub fn op_words(&mut self, pc: u64, op: u8, stack: &[U256], memory: &[u8]) {
        self.handler
            .on_opcode(pc, op, 1, stack, memory, addr(0xAA), false)
            .unwrap();
    }

    /// Opcode tick reporting the executing contract address explicitly.
    pub fn op_at(&mut self, contract: Address, pc: u64, op: u8, stack: &[U256], memory: &[u8]) {
        self.handler
            .on_opcode(pc, op, 1, stack, memory, contract, false)
            .unwrap();
    }

    pub fn exit(&mut self, output: &[u8], err: bool) {
        self.handler.on_exit(output, err).unwrap();
    }

    pub fn end_tx(&mut self) {
        self.handler.on_tx_end().unwrap();
    }

    pub fn output(&self) -> String {
        self.captured.borrow().clone()
    }
}

pub fn word(v: u64) -> U256 {
    U256::from(v)
}

//! The host-event dispatcher.
//!
//! One `DepHandler` instance observes one serial stream of host callbacks:
//! `block_start → (tx_start → (opcode | enter | exit | fault)* → tx_end)* →
//! block_end`. It owns the formula store, the per-transaction state, the
//! deferred-completion slot and the call-return stack.

use std::rc::Rc;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tracing::debug;

use crate::{
    config::TracerConfig,
    errors::TracerError,
    handlers::{
        CallExit, OpcodeEnv, PendingOp, Step, before_opcode, ops,
        precompiles::{precompile_for, run_precompile},
    },
    logger::LoggerConfig,
    opcodes,
    output::OutputWriter,
    shortener::ProtectedSet,
    simple_db::SimpleDB,
    transaction::TransactionDB,
};

/// Read access to host state, used by the CREATE and EXTCODE* handlers.
pub trait StateReader {
    fn get_nonce(&self, addr: Address) -> u64;
    fn get_code(&self, addr: Address) -> Bytes;
}

/// Everything `on_tx_start` needs to open a transaction.
#[derive(Debug, Clone)]
pub struct TxStart {
    pub block_number: u64,
    pub timestamp: u64,
    pub origin: Address,
    pub tx_hash: H256,
    pub is_create: bool,
    /// Call target, or the address the created contract will deploy at.
    pub address: Address,
    pub input: Bytes,
    /// Current code of the call target; empty for creates.
    pub code: Bytes,
    pub is_cancun: bool,
    pub is_london: bool,
}

pub struct DepHandler {
    db: Rc<SimpleDB>,
    state: Option<TransactionDB>,

    pending: Option<PendingOp>,
    ret_handlers: Vec<CallExit>,
    return_handled: bool,

    writing_block: bool,
    selfdestruct_protector: bool,
    is_cancun: bool,
    is_london: bool,

    enter_to: Address,
    enter_input: Bytes,
}

impl std::fmt::Debug for DepHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepHandler")
            .field("transacting", &self.state.is_some())
            .field("writing_block", &self.writing_block)
            .finish_non_exhaustive()
    }
}

impl DepHandler {
    /// Build a handler from a parsed config. Fatal on unknown engines,
    /// missing roots and malformed logger settings.
    pub fn new(config: TracerConfig) -> Result<Self, TracerError> {
        let writer = Rc::new(OutputWriter::from_config(&config.output)?);
        Self::with_writer(config, writer)
    }

    /// Like [`Self::new`] with a caller-supplied sink (FFI, tests).
    pub fn with_writer(
        config: TracerConfig,
        writer: Rc<OutputWriter>,
    ) -> Result<Self, TracerError> {
        let engine = config.kv.engine_kind()?;
        let logger_config = config
            .logger
            .clone()
            .unwrap_or_else(LoggerConfig::default_selection);

        let db = SimpleDB::open(
            vec![ProtectedSet::crypto()],
            logger_config,
            engine,
            &config.kv.root,
            writer,
        )?;

        Ok(Self {
            db: Rc::new(db),
            state: None,
            pending: None,
            ret_handlers: Vec::new(),
            return_handled: false,
            writing_block: false,
            selfdestruct_protector: false,
            is_cancun: false,
            is_london: false,
            enter_to: Address::zero(),
            enter_input: Bytes::new(),
        })
    }

    pub fn db(&self) -> &Rc<SimpleDB> {
        &self.db
    }

    /// Current transaction state, mostly for inspection in tests.
    pub fn state(&self) -> Option<&TransactionDB> {
        self.state.as_ref()
    }

    fn state_mut(&mut self) -> Result<&mut TransactionDB, TracerError> {
        self.state.as_mut().ok_or(TracerError::NoActiveTransaction)
    }

    // ---- host callbacks ----

    pub fn on_block_start(&mut self, block_number: u64, timestamp: u64) -> Result<(), TracerError> {
        if self.writing_block {
            return Err(TracerError::OverlappingBlock);
        }
        self.writing_block = true;
        debug!(block_number, timestamp, "block start");
        Ok(())
    }

    pub fn on_block_end(&mut self) {
        self.writing_block = false;
    }

    pub fn on_tx_start(
        &mut self,
        tx: TxStart,
        state_reader: Option<Rc<dyn StateReader>>,
    ) -> Result<(), TracerError> {
        if !self.writing_block {
            // Host activity outside a traced block is not ours to record.
            return Ok(());
        }
        if self.state.is_some() {
            return Err(TracerError::NestedTransaction);
        }

        self.is_cancun = tx.is_cancun;
        self.is_london = tx.is_london;
        self.pending = None;
        self.ret_handlers.clear();
        self.return_handled = false;
        self.selfdestruct_protector = false;

        let state = if tx.is_create {
            TransactionDB::new_create(self.db.clone(), tx.address, &tx.input, state_reader)?
        } else {
            TransactionDB::new_call(
                self.db.clone(),
                tx.address,
                &tx.input,
                &tx.code,
                state_reader,
            )?
        };

        self.db
            .logger()
            .enter_context(tx.block_number, tx.timestamp, tx.origin, tx.tx_hash);
        state.sync_logger_context()?;

        self.state = Some(state);
        Ok(())
    }

    pub fn on_tx_end(&mut self) -> Result<(), TracerError> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        state.commit()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_opcode(
        &mut self,
        pc: u64,
        op: u8,
        cost: u64,
        stack: &[U256],
        memory: &[u8],
        contract_addr: Address,
        err: bool,
    ) -> Result<(), TracerError> {
        if self.state.is_none() {
            return Ok(());
        }

        // The previous opcode's completion observes this tick's stack.
        if let Some(pending) = self.pending.take() {
            let state = self.state_mut()?;
            pending.complete(state, stack)?;
        }

        if err {
            let state = self.state_mut()?;
            ops::data_error(state, true)?;
            self.return_handled = true;
            return Ok(());
        }

        // Invalid ticks report zero cost for anything but the free
        // terminators.
        let is_invalid =
            cost == 0 && !matches!(op, opcodes::STOP | opcodes::RETURN | opcodes::REVERT);
        if is_invalid {
            return Ok(());
        }

        if op == opcodes::SELFDESTRUCT {
            // The host reports the beneficiary transfer as an enter/exit
            // pair right after; it must not be treated as a call.
            self.selfdestruct_protector = true;
        }

        let env = OpcodeEnv {
            pc,
            op,
            stack,
            memory,
            contract_addr,
            is_cancun: self.is_cancun,
            is_london: self.is_london,
        };
        let state = self.state.as_mut().ok_or(TracerError::NoActiveTransaction)?;
        match before_opcode(state, &env)? {
            Step::Pending(pending) => self.pending = Some(pending),
            Step::Return => self.return_handled = true,
            Step::Call(exit) => self.ret_handlers.push(exit),
        }
        Ok(())
    }

    pub fn on_enter(&mut self, to: Address, input: &[u8]) {
        if self.state.is_none() || self.selfdestruct_protector {
            return;
        }
        self.enter_to = to;
        self.enter_input = Bytes::copy_from_slice(input);
    }

    pub fn on_fault(&mut self, op: u8) -> Result<(), TracerError> {
        if self.state.is_none() {
            return Ok(());
        }
        if op == opcodes::REVERT {
            // REVERT already emitted its terminal event on its own tick.
            return Ok(());
        }
        // The faulting frame is dead; its deferred completion must not run
        // against the parent.
        self.pending = None;
        let state = self.state_mut()?;
        ops::data_error(state, true)?;
        self.return_handled = true;
        Ok(())
    }

    pub fn on_exit(&mut self, output: &[u8], err: bool) -> Result<(), TracerError> {
        if self.state.is_none() {
            return Ok(());
        }
        if self.selfdestruct_protector {
            self.selfdestruct_protector = false;
            return Ok(());
        }

        if !self.return_handled {
            if !output.is_empty() {
                // No opcode terminated this frame but it produced output:
                // only a precompile can do that.
                let Some(precompile) = precompile_for(&self.enter_to) else {
                    return Err(TracerError::UnknownPrecompile(self.enter_to));
                };
                let input = self.enter_input.clone();
                let state = self.state_mut()?;
                run_precompile(state, precompile, &input, output)?;
            } else {
                let state = self.state_mut()?;
                ops::data_error(state, err)?;
            }
        }
        self.return_handled = false;

        if let Some(exit) = self.ret_handlers.pop() {
            let state = self.state_mut()?;
            exit.complete(state, !err)?;
        }
        Ok(())
    }
}

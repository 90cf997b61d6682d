//! The per-transaction state machine.
//!
//! One `TransactionDB` lives from `on_tx_start` to `on_tx_end`: a frame
//! stack, the write overlay, the pending EVM logs and the current
//! returndata. Every call entry records a snapshot (overlay checkpoint,
//! frame depth, log count); returns commit the snapshot, reverts roll it
//! back.

use std::rc::Rc;

use bytes::Bytes;
use ethereum_types::{Address, H256};

use crate::{
    crypto::code_hash,
    depop::DepOp,
    errors::TracerError,
    formula::{DepByte, Formula, formula_dep_bytes},
    frame::{Frame, FrameStack},
    handler::StateReader,
    memory::ShadowMemory,
    overlay::{Checkpoint, OverlayCode, OverlayDB},
    simple_db::SimpleDB,
    stack::ShadowStack,
};

/// A pending LOGn event: data and topics as formulas, attributed to the
/// frame that emitted it.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub address: Address,
    pub address_version: u64,
    pub code_address: Address,
    pub data: Formula,
    pub topics: Vec<Formula>,
}

#[derive(Debug)]
struct Snapshot {
    overlay: Checkpoint,
    frame_depth: usize,
    log_count: usize,
}

pub struct TransactionDB {
    db: Rc<SimpleDB>,
    overlay: OverlayDB,
    frames: FrameStack,
    logs: Vec<LogRecord>,
    returndata: Vec<DepByte>,
    snapshots: Vec<Snapshot>,
    state_reader: Option<Rc<dyn StateReader>>,
}

impl std::fmt::Debug for TransactionDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionDB")
            .field("frames", &self.frames.depth())
            .field("logs", &self.logs.len())
            .field("returndata", &self.returndata.len())
            .finish_non_exhaustive()
    }
}

impl TransactionDB {
    /// Start a message-call transaction to `addr`. The raw calldata becomes
    /// an `OPCallData` constant; `code_of_to` seeds the code shadow when the
    /// store has never seen this address.
    pub fn new_call(
        db: Rc<SimpleDB>,
        addr: Address,
        calldata_bytes: &[u8],
        code_of_to: &[u8],
        state_reader: Option<Rc<dyn StateReader>>,
    ) -> Result<Self, TracerError> {
        let mut t = Self::base(db, false, addr, addr, state_reader)?;
        t.seed_code(addr, code_of_to)?;
        let calldata_formula = t
            .db
            .constant_new_with_shorts(DepOp::CallData, calldata_bytes.to_vec())?;
        let calldata = formula_dep_bytes(&calldata_formula);
        t.call(addr, addr, calldata)?;
        Ok(t)
    }

    /// Start a contract-creation transaction deploying at `addr`. The input
    /// becomes an `OPInitCode` constant and is the executing bytecode until
    /// the create returns.
    pub fn new_create(
        db: Rc<SimpleDB>,
        addr: Address,
        initcode_bytes: &[u8],
        state_reader: Option<Rc<dyn StateReader>>,
    ) -> Result<Self, TracerError> {
        let mut t = Self::base(db, true, addr, Address::zero(), state_reader)?;
        let initcode_formula = t
            .db
            .constant_new_with_shorts(DepOp::InitCode, initcode_bytes.to_vec())?;
        let initcode = formula_dep_bytes(&initcode_formula);
        t.create(addr, initcode, initcode_bytes)?;
        Ok(t)
    }

    fn base(
        db: Rc<SimpleDB>,
        is_create: bool,
        addr: Address,
        code_addr: Address,
        state_reader: Option<Rc<dyn StateReader>>,
    ) -> Result<Self, TracerError> {
        let mut overlay = OverlayDB::new(db.clone());
        let version = overlay.get_address_version(addr)?;
        let mut frames = FrameStack::new();
        // The bottom pseudo-frame survives the top-level return so commit
        // still knows which transaction it is finishing.
        frames.push(Frame::new(
            is_create,
            addr,
            version,
            code_addr,
            Vec::new(),
            Vec::new(),
            H256::zero(),
            H256::zero(),
        ));
        Ok(Self {
            db,
            overlay,
            frames,
            logs: Vec::new(),
            returndata: Vec::new(),
            snapshots: Vec::new(),
            state_reader,
        })
    }

    fn seed_code(&mut self, addr: Address, code_bytes: &[u8]) -> Result<(), TracerError> {
        if code_bytes.is_empty() {
            return Ok(());
        }
        if !self.overlay.get_code(addr)?.data.is_empty() {
            return Ok(());
        }
        let formula = self
            .db
            .constant_new_with_shorts(DepOp::Constant, code_bytes.to_vec())?;
        self.overlay
            .memoize_code(addr, formula_dep_bytes(&formula), code_hash(code_bytes));
        Ok(())
    }

    /// Code shadow for `addr`, synthesizing from the state reader when the
    /// store predates the address.
    fn code_shadow(&mut self, addr: Address) -> Result<OverlayCode, TracerError> {
        let code = self.overlay.get_code(addr)?;
        if !code.data.is_empty() {
            return Ok(code);
        }
        let bytes = match &self.state_reader {
            Some(reader) => reader.get_code(addr),
            None => Bytes::new(),
        };
        if bytes.is_empty() {
            return Ok(code);
        }
        let formula = self
            .db
            .constant_new_with_shorts(DepOp::Constant, bytes.to_vec())?;
        let shadow = formula_dep_bytes(&formula);
        self.overlay
            .memoize_code(addr, shadow, code_hash(&bytes));
        self.overlay.get_code(addr)
    }

    // ---- call / create / return / revert ----

    /// Enter a sub-call: snapshot, clear returndata, push the callee frame.
    pub fn call(
        &mut self,
        addr: Address,
        code_addr: Address,
        calldata: Vec<DepByte>,
    ) -> Result<(), TracerError> {
        self.snapshots.push(Snapshot {
            overlay: self.overlay.checkpoint(),
            frame_depth: self.frames.depth(),
            log_count: self.logs.len(),
        });
        self.returndata.clear();
        let version = self.overlay.get_address_version(addr)?;
        let code = self.code_shadow(code_addr)?;
        self.frames.push(Frame::new(
            false,
            addr,
            version,
            code_addr,
            calldata,
            code.data,
            code.code_hash,
            code.initcode_hash,
        ));
        Ok(())
    }

    /// Enter a create: the initcode is the executing bytecode, and both
    /// hashes record the initcode until the deployed code is set.
    pub fn create(
        &mut self,
        addr: Address,
        initcode: Vec<DepByte>,
        initcode_bytes: &[u8],
    ) -> Result<(), TracerError> {
        self.snapshots.push(Snapshot {
            overlay: self.overlay.checkpoint(),
            frame_depth: self.frames.depth(),
            log_count: self.logs.len(),
        });
        self.returndata.clear();
        let hash = code_hash(initcode_bytes);
        let version = self.overlay.get_address_version(addr)?;
        self.frames.push(Frame::new(
            true,
            addr,
            version,
            Address::zero(),
            Vec::new(),
            initcode,
            hash,
            hash,
        ));
        Ok(())
    }

    /// Terminate the current frame normally. For create frames the returned
    /// bytes become the deployed code and the caller sees empty returndata.
    /// Overlay writes made inside the frame survive into the parent.
    pub fn ret(
        &mut self,
        mut returndata: Vec<DepByte>,
        returndata_bytes: &[u8],
    ) -> Result<(), TracerError> {
        if self.is_create()? {
            let initcode_hash = self.frames.current()?.code_hash;
            let addr = self.address()?;
            let code_addr = self.code_address()?;
            self.overlay.set_code(
                addr,
                code_addr,
                returndata.clone(),
                returndata_bytes,
                initcode_hash,
            );
            returndata = Vec::new();
        }
        self.returndata = returndata;
        self.snapshots
            .pop()
            .ok_or(TracerError::MissingFrame)?;
        self.frames.pop()?;
        Ok(())
    }

    /// Terminate the current frame discarding its writes and logs.
    pub fn revert(&mut self, returndata: Vec<DepByte>) -> Result<(), TracerError> {
        let snapshot = self.snapshots.pop().ok_or(TracerError::MissingFrame)?;
        self.overlay.rollback_to(snapshot.overlay);
        self.logs.truncate(snapshot.log_count);
        self.frames.truncate(snapshot.frame_depth);
        self.returndata = returndata;
        Ok(())
    }

    /// Mark the executing address destructed, then terminate as a STOP.
    pub fn selfdestruct(&mut self) -> Result<(), TracerError> {
        let addr = self.address()?;
        self.overlay.destruct(addr);
        self.ret(Vec::new(), &[])
    }

    pub fn created(&self, addr: Address) -> bool {
        self.overlay.created(addr)
    }

    /// Top-level finish: emit the return-data and log events, flush the
    /// overlay, persist every reachable formula and reset the working set.
    pub fn commit(&mut self) -> Result<(), TracerError> {
        if !self.is_create()? {
            let addr = self.address()?;
            let version = self.address_version()?;
            let code_addr = self.code_address()?;
            self.db
                .logger()
                .log_return_data(&self.db, addr, version, code_addr, &self.returndata)?;
        }
        for log in &self.logs {
            self.db.logger().log_log(&self.db, log)?;
        }

        self.overlay.commit()?;

        for log in &self.logs {
            self.db.commit_formula_with_shorts(log.data.hash())?;
            for topic in &log.topics {
                self.db.commit_formula_with_shorts(topic.hash())?;
            }
        }
        self.db.commit_dep_bytes_with_shorts(&self.returndata)?;

        self.db.reset_formulas();
        Ok(())
    }

    // ---- current-frame accessors ----

    pub fn address(&self) -> Result<Address, TracerError> {
        Ok(self.frames.current()?.address)
    }

    pub fn address_version(&self) -> Result<u64, TracerError> {
        Ok(self.frames.current()?.address_version)
    }

    pub fn code_address(&self) -> Result<Address, TracerError> {
        Ok(self.frames.current()?.code_address)
    }

    pub fn code_hash(&self) -> Result<H256, TracerError> {
        Ok(self.frames.current()?.code_hash)
    }

    pub fn initcode_hash(&self) -> Result<H256, TracerError> {
        Ok(self.frames.current()?.initcode_hash)
    }

    pub fn is_create(&self) -> Result<bool, TracerError> {
        Ok(self.frames.current()?.is_create)
    }

    pub fn calldata(&self) -> Result<Vec<DepByte>, TracerError> {
        Ok(self.frames.current()?.calldata.clone())
    }

    pub fn code(&self) -> Result<Vec<DepByte>, TracerError> {
        Ok(self.frames.current()?.code.clone())
    }

    pub fn stack(&self) -> Result<&ShadowStack, TracerError> {
        Ok(&self.frames.current()?.stack)
    }

    pub fn memory(&self) -> Result<&ShadowMemory, TracerError> {
        Ok(&self.frames.current()?.memory)
    }

    pub fn stack_mut(&mut self) -> Result<&mut ShadowStack, TracerError> {
        Ok(&mut self.frames.current_mut()?.stack)
    }

    pub fn memory_mut(&mut self) -> Result<&mut ShadowMemory, TracerError> {
        Ok(&mut self.frames.current_mut()?.memory)
    }

    pub fn returndata(&self) -> &[DepByte] {
        &self.returndata
    }

    // ---- state access for the opcode handlers ----

    pub fn get_slot(&mut self, slot: H256) -> Result<Vec<DepByte>, TracerError> {
        let addr = self.address()?;
        Ok(self.overlay.get_slot(addr, slot)?.data)
    }

    pub fn set_slot(&mut self, slot: H256, val: Vec<DepByte>) -> Result<(), TracerError> {
        let addr = self.address()?;
        let code_addr = self.code_address()?;
        self.overlay.set_slot(addr, code_addr, slot, val);
        Ok(())
    }

    pub fn get_transient(&mut self, slot: H256) -> Result<Vec<DepByte>, TracerError> {
        let addr = self.address()?;
        Ok(self.overlay.get_transient(addr, slot))
    }

    pub fn set_transient(&mut self, slot: H256, val: Vec<DepByte>) -> Result<(), TracerError> {
        let addr = self.address()?;
        self.overlay.set_transient(addr, slot, val);
        Ok(())
    }

    /// Code shadow of an arbitrary address (EXTCODE* handlers).
    pub fn get_code_shadow(&mut self, addr: Address) -> Result<Vec<DepByte>, TracerError> {
        Ok(self.code_shadow(addr)?.data)
    }

    pub fn add_log(&mut self, data: Formula, topics: Vec<Formula>) -> Result<(), TracerError> {
        let record = LogRecord {
            address: self.address()?,
            address_version: self.address_version()?,
            code_address: self.code_address()?,
            data,
            topics,
        };
        self.logs.push(record);
        Ok(())
    }

    pub fn state_reader(&self) -> Option<Rc<dyn StateReader>> {
        self.state_reader.clone()
    }

    pub fn db(&self) -> &Rc<SimpleDB> {
        &self.db
    }

    /// Push the current frame's identity into the logger context.
    pub fn sync_logger_context(&self) -> Result<(), TracerError> {
        self.db.logger().set_contract_address(
            self.address()?,
            self.address_version()?,
            self.code_address()?,
            self.code_hash()?,
            self.initcode_hash()?,
        );
        Ok(())
    }

    // ---- formula facade ----

    pub fn constant_new_with_shorts(
        &self,
        opcode: DepOp,
        result: impl Into<Bytes>,
    ) -> Result<Formula, TracerError> {
        self.db.constant_new_with_shorts(opcode, result)
    }

    pub fn formula_new_with_shorts(
        &self,
        opcode: DepOp,
        result: impl Into<Bytes>,
        operands: Vec<H256>,
    ) -> Result<Formula, TracerError> {
        self.db.formula_new_with_shorts(opcode, result, operands)
    }

    pub fn formula_dep_with_shorts(&self, val: &[DepByte]) -> Result<Formula, TracerError> {
        self.db.formula_dep_with_shorts(val)
    }
}

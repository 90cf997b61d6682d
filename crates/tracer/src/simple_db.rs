//! The formula store: interning, persistence, shortening and logging.
//!
//! `SimpleDB` owns the KV tables, the two in-memory intern tables (raw
//! formulas and formulas that also have shortened twins), every registered
//! shortener, the event logger and the output writer. The in-memory tables
//! are cleared at each transaction boundary; persisted nodes survive in the
//! store.

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use ethereum_types::{Address, H256};
use provex_kv::{EngineKind, KvStore, Table};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    depop::DepOp,
    errors::TracerError,
    formula::{CONST_ZERO, DepByte, Formula, INIT_ZERO, init_dep_bytes},
    logger::{Logger, LoggerConfig},
    output::OutputWriter,
    shortener::{ProtectedSet, Shortener},
};

/// Formula bodies: `hash(32)` → formula binary.
pub const FORMULAS_TABLE: &str = "global.formulas";
/// Slot shadows: `addr(20) ‖ be_u64(version) ‖ key(32) ‖ pos(1)` → dep byte binary.
pub const SLOTS_TABLE: &str = "slots";
/// Code shadows: `addr(20) ‖ be_u64(version) ‖ be_u64(offset)` → dep byte binary.
pub const CODES_TABLE: &str = "codes";
/// Code hash records: `addr(20) ‖ be_u64(version)` → `code_hash(32) ‖ initcode_hash(32)`.
pub const CODE_HASHES_TABLE: &str = "code_hashes";
/// Address versions: `addr(20)` → `be_u64(version)`; absent means 0.
pub const VERSIONS_TABLE: &str = "versions";

#[derive(Debug, Clone)]
struct CommitFormula {
    formula: Formula,
    committed: bool,
}

#[derive(Debug)]
pub struct SimpleDB {
    formulas: RefCell<FxHashMap<H256, CommitFormula>>,
    formulas_with_shorts: RefCell<FxHashMap<H256, CommitFormula>>,
    formulas_table: Table,
    slots_table: Table,
    codes_table: Table,
    code_hashes_table: Table,
    versions_table: Table,
    shorts: Vec<Shortener>,
    logger: Logger,
    writer: Rc<OutputWriter>,
}

fn slot_location(addr: Address, version: u64, key: H256, pos: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + 8 + 32 + 1);
    out.extend_from_slice(addr.as_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(key.as_bytes());
    out.push(pos);
    out
}

fn code_hash_location(addr: Address, version: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + 8);
    out.extend_from_slice(addr.as_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out
}

fn code_location(addr: Address, version: u64, pos: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + 8 + 8);
    out.extend_from_slice(addr.as_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&pos.to_be_bytes());
    out
}

impl SimpleDB {
    /// Open the store and seed the zero constants.
    pub fn open(
        policies: Vec<ProtectedSet>,
        logger_config: LoggerConfig,
        engine: EngineKind,
        root: &str,
        writer: Rc<OutputWriter>,
    ) -> Result<Self, TracerError> {
        let mut tables: Vec<String> = vec![
            FORMULAS_TABLE.to_string(),
            SLOTS_TABLE.to_string(),
            CODES_TABLE.to_string(),
            CODE_HASHES_TABLE.to_string(),
            VERSIONS_TABLE.to_string(),
        ];
        for policy in &policies {
            tables.push(Shortener::table_name(policy.name()));
        }

        let store = KvStore::open(engine, root, &tables)?;

        let shorts = policies
            .into_iter()
            .map(|policy| {
                let table = store.table(&Shortener::table_name(policy.name()));
                Shortener::new(policy, table)
            })
            .collect();

        let logger = Logger::new(logger_config, writer.clone())?;

        let db = Self {
            formulas: RefCell::new(FxHashMap::default()),
            formulas_with_shorts: RefCell::new(FxHashMap::default()),
            formulas_table: store.table(FORMULAS_TABLE),
            slots_table: store.table(SLOTS_TABLE),
            codes_table: store.table(CODES_TABLE),
            code_hashes_table: store.table(CODE_HASHES_TABLE),
            versions_table: store.table(VERSIONS_TABLE),
            shorts,
            logger,
            writer,
        };

        // The zero seeds must always be resolvable from the store.
        db.save_formula(&INIT_ZERO)?;
        db.save_formula(&CONST_ZERO)?;

        Ok(db)
    }

    pub fn shorts(&self) -> &[Shortener] {
        &self.shorts
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    // ---- interning ----

    /// Intern a constant node. Idempotent.
    pub fn constant_new(&self, opcode: DepOp, result: impl Into<Bytes>) -> Formula {
        let formula = Formula::constant(opcode, result);
        self.formulas
            .borrow_mut()
            .entry(formula.hash())
            .or_insert_with(|| CommitFormula {
                formula: formula.clone(),
                committed: false,
            });
        formula
    }

    /// Intern a dynamic node. Idempotent.
    pub fn formula_new(
        &self,
        opcode: DepOp,
        result: impl Into<Bytes>,
        operands: Vec<H256>,
    ) -> Formula {
        let formula = Formula::with_operands(opcode, result, operands);
        self.formulas
            .borrow_mut()
            .entry(formula.hash())
            .or_insert_with(|| CommitFormula {
                formula: formula.clone(),
                committed: false,
            });
        formula
    }

    /// Intern a constant node into the with-shorts table as well: runs every
    /// shortener over it and emits the opcode log event.
    pub fn constant_new_with_shorts(
        &self,
        opcode: DepOp,
        result: impl Into<Bytes>,
    ) -> Result<Formula, TracerError> {
        let formula = self.constant_new(opcode, result);
        self.promote_with_shorts(formula)
    }

    /// Dynamic-node variant of [`Self::constant_new_with_shorts`].
    pub fn formula_new_with_shorts(
        &self,
        opcode: DepOp,
        result: impl Into<Bytes>,
        operands: Vec<H256>,
    ) -> Result<Formula, TracerError> {
        let formula = self.formula_new(opcode, result, operands);
        self.promote_with_shorts(formula)
    }

    fn promote_with_shorts(&self, formula: Formula) -> Result<Formula, TracerError> {
        {
            let mut table = self.formulas_with_shorts.borrow_mut();
            if table.contains_key(&formula.hash()) {
                return Ok(formula);
            }
            table.insert(
                formula.hash(),
                CommitFormula {
                    formula: formula.clone(),
                    committed: false,
                },
            );
        }
        for short in &self.shorts {
            short.shorten(self, &formula)?;
        }
        self.logger.log_opcode(self, &formula)?;
        Ok(formula)
    }

    // ---- lookup ----

    /// Read-through formula lookup: memory table, then the persistent store.
    pub fn get_formula(&self, hash: H256) -> Result<Formula, TracerError> {
        if let Some(cf) = self.formulas.borrow().get(&hash) {
            return Ok(cf.formula.clone());
        }
        let raw = self.formulas_table.get_required(hash.as_bytes())?;
        let formula = Formula::from_bin(&raw)?;
        self.formulas.borrow_mut().insert(
            hash,
            CommitFormula {
                formula: formula.clone(),
                committed: true,
            },
        );
        Ok(formula)
    }

    /// Like [`Self::get_formula`], but also makes sure the node and its
    /// shortened twins are present in the with-shorts view.
    pub fn get_formula_with_shorts(&self, hash: H256) -> Result<Formula, TracerError> {
        if let Some(cf) = self.formulas_with_shorts.borrow().get(&hash) {
            return Ok(cf.formula.clone());
        }
        let formula = self.get_formula(hash)?;
        self.formulas_with_shorts.borrow_mut().insert(
            hash,
            CommitFormula {
                formula: formula.clone(),
                committed: true,
            },
        );
        for short in &self.shorts {
            let entry = short.load_entry(hash)?;
            self.get_formula(entry.hash)?;
        }
        Ok(formula)
    }

    // ---- commit ----

    fn save_formula(&self, formula: &Formula) -> Result<(), TracerError> {
        self.formulas_table
            .put(formula.hash().as_bytes(), &formula.to_bin())?;
        Ok(())
    }

    /// Depth-first persist of a node and all operands. Idempotent via the
    /// per-node committed flag. The root must be interned; operands that are
    /// not in memory were persisted earlier.
    pub fn commit_formula(&self, hash: H256) -> Result<(), TracerError> {
        let mut work = vec![(hash, true)];
        while let Some((h, required)) = work.pop() {
            let formula = {
                let mut table = self.formulas.borrow_mut();
                match table.get_mut(&h) {
                    None if required => {
                        // Not in the working set: either committed by an
                        // earlier transaction, or lost.
                        if self.formulas_table.get(h.as_bytes())?.is_some() {
                            continue;
                        }
                        return Err(TracerError::Corruption(format!(
                            "commit of unknown formula {h:?}"
                        )));
                    }
                    None => continue,
                    Some(cf) if cf.committed => continue,
                    Some(cf) => {
                        cf.committed = true;
                        cf.formula.clone()
                    }
                }
            };
            self.save_formula(&formula)?;
            for operand in formula.operands() {
                work.push((*operand, false));
            }
        }
        Ok(())
    }

    /// Persist a node, its shortened twins (and their mapping records), and
    /// all operands, depth-first and idempotently.
    pub fn commit_formula_with_shorts(&self, hash: H256) -> Result<(), TracerError> {
        let mut work = vec![(hash, true)];
        while let Some((h, required)) = work.pop() {
            let formula = {
                let mut table = self.formulas_with_shorts.borrow_mut();
                match table.get_mut(&h) {
                    None if required => {
                        if self.formulas_table.get(h.as_bytes())?.is_some() {
                            continue;
                        }
                        return Err(TracerError::Corruption(format!(
                            "commit of unknown formula {h:?}"
                        )));
                    }
                    None => continue,
                    Some(cf) if cf.committed => continue,
                    Some(cf) => {
                        cf.committed = true;
                        cf.formula.clone()
                    }
                }
            };
            self.save_formula(&formula)?;
            for short in &self.shorts {
                let entry = short.load_entry(h)?;
                let twin = {
                    let mut table = self.formulas.borrow_mut();
                    match table.get_mut(&entry.hash) {
                        None => {
                            return Err(TracerError::Corruption(
                                "shortened twin is not interned".to_string(),
                            ));
                        }
                        Some(cf) if cf.committed => None,
                        Some(cf) => {
                            cf.committed = true;
                            Some(cf.formula.clone())
                        }
                    }
                };
                if let Some(twin) = twin {
                    self.save_formula(&twin)?;
                    short.save_entry(h)?;
                }
            }
            for operand in formula.operands() {
                work.push((*operand, false));
            }
        }
        Ok(())
    }

    /// Commit every distinct formula a shadow region references.
    pub fn commit_dep_bytes(&self, data: &[DepByte]) -> Result<(), TracerError> {
        let mut prev = H256::zero();
        for b in data {
            if b.formula != prev {
                self.commit_formula(b.formula)?;
                prev = b.formula;
            }
        }
        Ok(())
    }

    /// With-shorts variant of [`Self::commit_dep_bytes`].
    pub fn commit_dep_bytes_with_shorts(&self, data: &[DepByte]) -> Result<(), TracerError> {
        let mut prev = H256::zero();
        for b in data {
            if b.formula != prev {
                self.commit_formula_with_shorts(b.formula)?;
                prev = b.formula;
            }
        }
        Ok(())
    }

    /// Drop the in-memory working set at a transaction boundary. Persisted
    /// nodes stay reachable through the store.
    pub fn reset_formulas(&self) {
        debug!(
            raw = self.formulas.borrow().len(),
            with_shorts = self.formulas_with_shorts.borrow().len(),
            "resetting formula working set"
        );
        self.formulas.borrow_mut().clear();
        self.formulas_with_shorts.borrow_mut().clear();
        for short in &self.shorts {
            short.reset();
        }
    }

    // ---- structural slicing ----

    fn offset_constant(&self, value: u64) -> Formula {
        self.constant_new(DepOp::Constant, value.to_be_bytes().to_vec())
    }

    fn offset_constant_with_shorts(&self, value: u64) -> Result<Formula, TracerError> {
        self.constant_new_with_shorts(DepOp::Constant, value.to_be_bytes().to_vec())
    }

    /// Slice `[offset, offset + size)` out of a formula, structurally:
    /// Concat nodes are traversed, existing slices fuse their offsets, and
    /// anything else is wrapped in a new `OPSlice` node.
    pub fn formula_slice(
        &self,
        formula: &Formula,
        offset: u64,
        size: u64,
    ) -> Result<Formula, TracerError> {
        let total = formula.result().len() as u64;
        let end = offset + size;
        if offset > total || end > total {
            return Err(TracerError::Corruption(format!(
                "formula slice [{offset}, {end}) out of bounds (len {total})"
            )));
        }
        if size == 0 {
            return Ok(self.formula_new(DepOp::Concat, Bytes::new(), Vec::new()));
        }

        match formula.opcode() {
            DepOp::Concat => {
                let mut byte_parts: Vec<u8> = Vec::new();
                let mut hash_parts: Vec<H256> = Vec::new();
                let mut i = 0u64;
                for operand_hash in formula.operands() {
                    let child = self.get_formula(*operand_hash)?;
                    let j = i + child.result().len() as u64;
                    if j >= offset {
                        if i >= offset && j <= end {
                            // fully inside
                            byte_parts.extend_from_slice(child.result());
                            hash_parts.push(child.hash());
                        } else {
                            let from = offset.max(i) - i;
                            let to = end.min(j) - i;
                            if to > from {
                                let piece = self.formula_slice(&child, from, to - from)?;
                                byte_parts.extend_from_slice(piece.result());
                                hash_parts.push(piece.hash());
                            }
                        }
                    }
                    if end <= j {
                        break;
                    }
                    i = j;
                }
                if hash_parts.len() == 1 {
                    return self.get_formula(hash_parts[0]);
                }
                Ok(self.formula_new(DepOp::Concat, byte_parts, hash_parts))
            }
            DepOp::Slice => {
                // Fuse with the existing slice offset.
                let [source, prev_offset, _] = formula.operands() else {
                    return Err(TracerError::Corruption(
                        "slice node without three operands".to_string(),
                    ));
                };
                let prev_offset_formula = self.get_formula(*prev_offset)?;
                let prev_offset = u64::from_be_bytes(
                    prev_offset_formula.result().as_ref().try_into().map_err(|_| {
                        TracerError::Corruption("malformed slice offset operand".to_string())
                    })?,
                );
                let offset_op = self.offset_constant(prev_offset + offset);
                let size_op = self.offset_constant(size);
                Ok(self.formula_new(
                    DepOp::Slice,
                    formula.result().slice(offset as usize..end as usize),
                    vec![*source, offset_op.hash(), size_op.hash()],
                ))
            }
            _ => {
                let offset_op = self.offset_constant(offset);
                let size_op = self.offset_constant(size);
                Ok(self.formula_new(
                    DepOp::Slice,
                    formula.result().slice(offset as usize..end as usize),
                    vec![formula.hash(), offset_op.hash(), size_op.hash()],
                ))
            }
        }
    }

    // ---- materializing shadows ----

    /// Materialize a shadow region back into a formula. Adjacent bytes from
    /// consecutive positions of the same source coalesce into one slice;
    /// full coverage of a source becomes the source itself; multiple pieces
    /// become an `OPConcat`.
    pub fn formula_dep(&self, val: &[DepByte]) -> Result<Formula, TracerError> {
        self.formula_dep_inner(val, false)
    }

    /// With-shorts variant of [`Self::formula_dep`].
    pub fn formula_dep_with_shorts(&self, val: &[DepByte]) -> Result<Formula, TracerError> {
        self.formula_dep_inner(val, true)
    }

    fn formula_dep_inner(&self, val: &[DepByte], with_shorts: bool) -> Result<Formula, TracerError> {
        if val.is_empty() {
            return if with_shorts {
                self.formula_new_with_shorts(DepOp::Concat, Bytes::new(), Vec::new())
            } else {
                Ok(self.formula_new(DepOp::Concat, Bytes::new(), Vec::new()))
            };
        }

        // Group into maximal runs of consecutive positions of one source.
        let mut ranges: Vec<(H256, u64, u64)> = Vec::new(); // (formula, first, size)
        for b in val {
            match ranges.last_mut() {
                Some((formula, first, size))
                    if *formula == b.formula && *first + *size == b.pos =>
                {
                    *size += 1;
                }
                _ => ranges.push((b.formula, b.pos, 1)),
            }
        }

        let mut result_bytes: Vec<u8> = Vec::with_capacity(val.len());
        let mut parts: Vec<H256> = Vec::with_capacity(ranges.len());
        for (formula_hash, first, size) in ranges {
            let formula = if with_shorts {
                self.get_formula_with_shorts(formula_hash)?
            } else {
                self.get_formula(formula_hash)?
            };
            let total = formula.result().len() as u64;
            if first == 0 && size == total {
                parts.push(formula_hash);
                result_bytes.extend_from_slice(formula.result());
            } else {
                let (offset_op, size_op) = if with_shorts {
                    (
                        self.offset_constant_with_shorts(first)?,
                        self.offset_constant_with_shorts(size)?,
                    )
                } else {
                    (self.offset_constant(first), self.offset_constant(size))
                };
                let piece = formula
                    .result()
                    .slice(first as usize..(first + size) as usize);
                result_bytes.extend_from_slice(&piece);
                let operands = vec![formula_hash, offset_op.hash(), size_op.hash()];
                let slice = if with_shorts {
                    self.formula_new_with_shorts(DepOp::Slice, piece, operands)?
                } else {
                    self.formula_new(DepOp::Slice, piece, operands)
                };
                parts.push(slice.hash());
            }
        }

        if parts.len() == 1 {
            return if with_shorts {
                self.get_formula_with_shorts(parts[0])
            } else {
                self.get_formula(parts[0])
            };
        }
        if with_shorts {
            self.formula_new_with_shorts(DepOp::Concat, result_bytes, parts)
        } else {
            Ok(self.formula_new(DepOp::Concat, result_bytes, parts))
        }
    }

    // ---- persistent slot / code / version state ----

    pub fn get_address_version(&self, addr: Address) -> Result<u64, TracerError> {
        match self.versions_table.get(addr.as_bytes())? {
            None => Ok(0),
            Some(raw) => Ok(u64::from_be_bytes(raw.as_slice().try_into().map_err(
                |_| TracerError::Corruption("malformed version record".to_string()),
            )?)),
        }
    }

    /// Bump the version after a self-destruct: later lookups observe a fresh
    /// storage/code namespace for the address.
    pub fn increase_address_version(&self, addr: Address) -> Result<u64, TracerError> {
        let version = self.get_address_version(addr)? + 1;
        self.versions_table
            .put(addr.as_bytes(), &version.to_be_bytes())?;
        Ok(version)
    }

    pub fn get_slot(&self, addr: Address, key: H256) -> Result<Vec<DepByte>, TracerError> {
        let version = self.get_address_version(addr)?;
        let mut out = Vec::with_capacity(32);
        for pos in 0u8..32 {
            let location = slot_location(addr, version, key, pos);
            if let Some(raw) = self.slots_table.get(&location)? {
                out.push(DepByte::from_bin(&raw)?);
            }
        }
        match out.len() {
            0 => Ok(init_dep_bytes(32)),
            32 => Ok(out),
            n => Err(TracerError::Corruption(format!(
                "slot record has {n} of 32 bytes"
            ))),
        }
    }

    pub fn set_slot(
        &self,
        addr: Address,
        key: H256,
        val: &[DepByte],
    ) -> Result<(), TracerError> {
        if val.len() != 32 {
            return Err(TracerError::Corruption(format!(
                "slot write of {} bytes",
                val.len()
            )));
        }
        let version = self.get_address_version(addr)?;
        for (pos, b) in val.iter().enumerate() {
            let location = slot_location(addr, version, key, pos as u8);
            self.slots_table.put(&location, &b.to_bin())?;
        }
        Ok(())
    }

    /// Code shadow plus the `(code_hash, initcode_hash)` record. Unknown
    /// addresses yield zero hashes and an empty shadow.
    pub fn get_code(&self, addr: Address) -> Result<(H256, H256, Vec<DepByte>), TracerError> {
        let version = self.get_address_version(addr)?;

        let (code_hash, initcode_hash) =
            match self.code_hashes_table.get(&code_hash_location(addr, version))? {
                None => (H256::zero(), H256::zero()),
                Some(raw) if raw.len() == 64 => (
                    H256::from_slice(&raw[..32]),
                    H256::from_slice(&raw[32..]),
                ),
                Some(_) => {
                    return Err(TracerError::Corruption(
                        "malformed code hash record".to_string(),
                    ));
                }
            };

        let mut data = Vec::new();
        for pos in 0u64.. {
            match self.codes_table.get(&code_location(addr, version, pos))? {
                None => break,
                Some(raw) => data.push(DepByte::from_bin(&raw)?),
            }
        }
        Ok((code_hash, initcode_hash, data))
    }

    pub fn set_code(
        &self,
        addr: Address,
        val: &[DepByte],
        code_hash: H256,
        initcode_hash: H256,
    ) -> Result<(), TracerError> {
        let version = self.get_address_version(addr)?;

        let mut record = Vec::with_capacity(64);
        record.extend_from_slice(code_hash.as_bytes());
        record.extend_from_slice(initcode_hash.as_bytes());
        self.code_hashes_table
            .put(&code_hash_location(addr, version), &record)?;

        for (pos, b) in val.iter().enumerate() {
            self.codes_table
                .put(&code_location(addr, version, pos as u64), &b.to_bin())?;
        }
        // Trim any longer code previously stored under this version.
        for pos in val.len() as u64.. {
            let location = code_location(addr, version, pos);
            if self.codes_table.get(&location)?.is_none() {
                break;
            }
            self.codes_table.delete(&location)?;
        }
        Ok(())
    }

    // ---- rendering ----

    /// Render a formula tree: constants as `OPName(0x..)`, dynamic nodes
    /// with operands indented 4 spaces and runs of a repeated operand
    /// compressed as `… * N`.
    pub fn render(&self, formula: &Formula) -> Result<String, TracerError> {
        let mut out = String::new();
        self.render_into(formula, 0, &mut out)?;
        Ok(out)
    }

    fn render_into(
        &self,
        formula: &Formula,
        depth: usize,
        out: &mut String,
    ) -> Result<(), TracerError> {
        let indent = "    ".repeat(depth);
        if formula.is_constant() {
            out.push_str(&format!(
                "{indent}{}(0x{})\n",
                formula.opcode().name(),
                hex::encode(formula.result())
            ));
            return Ok(());
        }
        if formula.operands().is_empty() {
            out.push_str(&format!("{indent}{}()\n", formula.opcode().name()));
            return Ok(());
        }
        out.push_str(&format!(
            "{indent}{}( # 0x{}\n",
            formula.opcode().name(),
            hex::encode(formula.result())
        ));
        let mut prev: Option<H256> = None;
        let mut repeated = 0usize;
        for operand in formula.operands() {
            if prev == Some(*operand) {
                repeated += 1;
            } else {
                if repeated > 0 {
                    out.pop();
                    out.push_str(&format!(" * {}\n", repeated + 1));
                    repeated = 0;
                }
                let child = self.get_formula(*operand)?;
                self.render_into(&child, depth + 1, out)?;
            }
            prev = Some(*operand);
        }
        if repeated > 0 {
            out.pop();
            out.push_str(&format!(" * {}\n", repeated + 1));
        }
        out.push_str(&format!("{indent})\n"));
        Ok(())
    }

    /// Write a formula tree to the output sink.
    pub fn print(&self, formula: &Formula) -> Result<(), TracerError> {
        let rendered = self.render(formula)?;
        self.writer.print(&rendered);
        Ok(())
    }
}

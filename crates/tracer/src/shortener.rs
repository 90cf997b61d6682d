//! Policy-driven formula shortening.
//!
//! Each policy names a set of protected opcodes. For every interned formula
//! a "shortened twin" is maintained: subtrees containing no protected
//! opcode collapse to their literal value (`OPConstant`), protected
//! structure is rebuilt over the shortened operands. Addressable nodes
//! (`SLoad`/`SStore`) additionally remember the stored value's twin so that
//! reads resolve transparently through storage.

use std::cell::RefCell;

use ethereum_types::H256;
use provex_kv::Table;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    depop::DepOp,
    errors::TracerError,
    formula::{CONST_ZERO, Formula, INIT_ZERO},
    simple_db::SimpleDB,
};

/// A named set of protected opcodes.
#[derive(Debug, Clone)]
pub struct ProtectedSet {
    name: String,
    ops: FxHashSet<DepOp>,
}

impl ProtectedSet {
    pub fn new(name: &str, ops: impl IntoIterator<Item = DepOp>) -> Self {
        Self {
            name: name.to_string(),
            ops: ops.into_iter().collect(),
        }
    }

    /// The built-in policy: preserve everything cryptographic.
    pub fn crypto() -> Self {
        use DepOp::*;
        Self::new(
            "crypto",
            [
                SLoad, SStore, Keccak, CodeKeccak, EcRecover, Sha256, Ripemd160, ModExp, EcAddX,
                EcAddY, EcMulX, EcMulY, EcPairing, Blake2F,
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, op: DepOp) -> bool {
        self.ops.contains(&op)
    }
}

/// The shortened twin of one formula under one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEntry {
    pub hash: H256,
    pub protected: bool,
    /// For addressable parents: the stored value's twin, resolved in place
    /// of the node itself when it appears as an operand.
    pub source: Option<(H256, bool)>,
}

impl ShortEntry {
    fn plain(hash: H256, protected: bool) -> Self {
        Self {
            hash,
            protected,
            source: None,
        }
    }

    /// Binary layout: `hash(32) ‖ protected(1) [‖ source_hash(32) ‖
    /// source_protected(1)]`.
    pub fn to_bin(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(66);
        out.extend_from_slice(self.hash.as_bytes());
        out.push(self.protected as u8);
        if let Some((source_hash, source_protected)) = self.source {
            out.extend_from_slice(source_hash.as_bytes());
            out.push(source_protected as u8);
        }
        out
    }

    pub fn from_bin(val: &[u8]) -> Result<Self, TracerError> {
        let corrupt = || TracerError::Corruption("truncated formula mapping record".to_string());
        let (hash, rest) = val.split_at_checked(32).ok_or_else(corrupt)?;
        let (&protected, rest) = rest.split_first().ok_or_else(corrupt)?;
        let source = if rest.is_empty() {
            None
        } else {
            let (source_hash, rest) = rest.split_at_checked(32).ok_or_else(corrupt)?;
            let (&source_protected, _) = rest.split_first().ok_or_else(corrupt)?;
            Some((H256::from_slice(source_hash), source_protected != 0))
        };
        Ok(Self {
            hash: H256::from_slice(hash),
            protected: protected != 0,
            source,
        })
    }
}

/// One shortening policy with its persistent parent → twin mapping.
#[derive(Debug)]
pub struct Shortener {
    protected: ProtectedSet,
    mapping_table: Table,
    mapping: RefCell<FxHashMap<H256, ShortEntry>>,
}

impl Shortener {
    pub fn new(protected: ProtectedSet, mapping_table: Table) -> Self {
        let s = Self {
            protected,
            mapping_table,
            mapping: RefCell::new(FxHashMap::default()),
        };
        s.reset();
        s
    }

    pub fn name(&self) -> &str {
        self.protected.name()
    }

    /// Table name for a policy's mapping bucket.
    pub fn table_name(policy: &str) -> String {
        format!("global.{policy}.formula_mappings")
    }

    /// Reseed the in-memory mapping. `OPInitZero` maps to itself when
    /// protected, else to `OPConstant(0)`; `OPConstant(0)` maps to itself.
    pub fn reset(&self) {
        let mut mapping = self.mapping.borrow_mut();
        mapping.clear();
        let init = INIT_ZERO.hash();
        let zero = CONST_ZERO.hash();
        if self.protected.contains(DepOp::InitZero) {
            mapping.insert(init, ShortEntry::plain(init, true));
        } else {
            mapping.insert(init, ShortEntry::plain(zero, false));
        }
        mapping.insert(zero, ShortEntry::plain(zero, false));
    }

    /// Twin of `parent_hash`: memory first, then the persistent mapping.
    /// A miss for a hash that was never shortened is corruption.
    pub fn load_entry(&self, parent_hash: H256) -> Result<ShortEntry, TracerError> {
        if let Some(entry) = self.mapping.borrow().get(&parent_hash) {
            return Ok(*entry);
        }
        let raw = self.mapping_table.get_required(parent_hash.as_bytes())?;
        let entry = ShortEntry::from_bin(&raw)?;
        self.mapping.borrow_mut().insert(parent_hash, entry);
        Ok(entry)
    }

    /// Persist the in-memory twin of `parent_hash`.
    pub fn save_entry(&self, parent_hash: H256) -> Result<(), TracerError> {
        let entry = *self
            .mapping
            .borrow()
            .get(&parent_hash)
            .ok_or_else(|| TracerError::Corruption("missing shortener mapping".to_string()))?;
        self.mapping_table
            .put(parent_hash.as_bytes(), &entry.to_bin())?;
        Ok(())
    }

    /// Compute and record the shortened twin of `parent`.
    ///
    /// Operands must already have twins (the DAG is built bottom-up).
    pub fn shorten(&self, db: &SimpleDB, parent: &Formula) -> Result<(), TracerError> {
        let parent_hash = parent.hash();
        if self.mapping.borrow().contains_key(&parent_hash) {
            return Ok(());
        }

        let mut protected = self.protected.contains(parent.opcode());
        let is_source = parent.opcode().is_addressable();
        let mut source: Option<(H256, bool)> = None;

        let mut operand_twins = Vec::with_capacity(parent.operands().len());
        for (i, operand_hash) in parent.operands().iter().enumerate() {
            let mut child = self.load_entry(*operand_hash)?;
            // An addressable operand stands for its stored value.
            if let Some((source_hash, source_protected)) = child.source {
                child = ShortEntry::plain(source_hash, source_protected);
            }
            if is_source {
                // Only the value operand decides protection of a store/load.
                if i == 0 {
                    source = Some((child.hash, child.protected));
                    protected = protected || child.protected;
                }
            } else {
                protected = protected || child.protected;
            }
            operand_twins.push(db.get_formula(child.hash)?);
        }

        let entry = if protected && parent.opcode() == DepOp::Concat {
            // Fuse runs of constant children into single literals.
            let mut ops: Vec<H256> = Vec::new();
            let mut const_run: Vec<u8> = Vec::new();
            for twin in &operand_twins {
                if twin.opcode() == DepOp::Constant {
                    const_run.extend_from_slice(twin.result());
                } else {
                    if !const_run.is_empty() {
                        let fused = db.constant_new(DepOp::Constant, std::mem::take(&mut const_run));
                        ops.push(fused.hash());
                    }
                    ops.push(twin.hash());
                }
            }
            if !const_run.is_empty() {
                let fused = db.constant_new(DepOp::Constant, const_run);
                ops.push(fused.hash());
            }
            let twin = db.formula_new(DepOp::Concat, parent.result().clone(), ops);
            ShortEntry::plain(twin.hash(), true)
        } else if protected {
            let ops = operand_twins.iter().map(Formula::hash).collect();
            let twin = db.formula_new(parent.opcode(), parent.result().clone(), ops);
            ShortEntry {
                hash: twin.hash(),
                protected: true,
                source: if is_source { source } else { None },
            }
        } else {
            let twin = db.constant_new(DepOp::Constant, parent.result().clone());
            ShortEntry::plain(twin.hash(), false)
        };

        self.mapping.borrow_mut().insert(parent_hash, entry);
        Ok(())
    }
}

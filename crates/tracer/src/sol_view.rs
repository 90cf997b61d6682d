//! Solidity storage-layout recovery.
//!
//! Walks a slot formula and unwraps the `keccak(key ‖ baseSlot)` /
//! `baseSlot + offset` nesting the Solidity compiler emits for mappings,
//! dynamic arrays and struct members.

use crate::{
    depop::DepOp,
    errors::TracerError,
    formula::Formula,
    output::OutputWriter,
    simple_db::SimpleDB,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolLine {
    /// A literal slot value.
    Constant(Vec<u8>),
    /// A non-zero additive offset from the base slot.
    Offset(Vec<u8>),
    /// A mapping key; empty for a dynamic-array data slot.
    Mapping(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolView(Vec<SolLine>);

impl SolView {
    /// Decode a slot formula. Innermost base slot first, then one line per
    /// nesting level.
    pub fn build(db: &SimpleDB, formula: &Formula) -> Result<Self, TracerError> {
        let mut lines = Vec::new();
        walk(db, formula, &mut lines)?;
        Ok(Self(lines))
    }

    pub fn entries(&self) -> &[SolLine] {
        &self.0
    }

    pub fn lines(&self) -> Vec<String> {
        self.0
            .iter()
            .enumerate()
            .map(|(i, line)| match line {
                SolLine::Constant(data) => format!("# {i} constant {}", hex::encode(data)),
                SolLine::Offset(data) => format!("# {i} offset   {}", hex::encode(data)),
                SolLine::Mapping(data) if data.is_empty() => {
                    format!("# {i} mapping  (possibly array)")
                }
                SolLine::Mapping(data) => format!("# {i} mapping  {}", hex::encode(data)),
            })
            .collect()
    }

    pub fn print(&self, writer: &OutputWriter) {
        for line in self.lines() {
            writer.println(&line);
        }
    }
}

fn walk(db: &SimpleDB, formula: &Formula, out: &mut Vec<SolLine>) -> Result<(), TracerError> {
    match formula.opcode() {
        DepOp::Keccak => {
            let Some(preimage_hash) = formula.operands().first() else {
                out.push(SolLine::Constant(formula.result().to_vec()));
                return Ok(());
            };
            let preimage = db.get_formula(*preimage_hash)?;
            let len = preimage.result().len() as u64;
            if len >= 32 {
                // The last 32 bytes are the base slot, the prefix the key.
                let base = db.formula_slice(&preimage, len - 32, 32)?;
                walk(db, &base, out)?;
                let key = db.formula_slice(&preimage, 0, len - 32)?;
                out.push(SolLine::Mapping(key.result().to_vec()));
            } else {
                out.push(SolLine::Constant(formula.result().to_vec()));
            }
        }
        DepOp::Add => {
            let [a, b] = formula.operands() else {
                out.push(SolLine::Constant(formula.result().to_vec()));
                return Ok(());
            };
            let mut base = db.get_formula(*a)?;
            let mut offset = db.get_formula(*b)?;
            if base.opcode() != DepOp::Keccak && offset.opcode() != DepOp::Keccak {
                out.push(SolLine::Constant(formula.result().to_vec()));
                return Ok(());
            }
            if base.opcode() != DepOp::Keccak {
                std::mem::swap(&mut base, &mut offset);
            }
            walk(db, &base, out)?;
            if offset.result().iter().any(|b| *b != 0) {
                out.push(SolLine::Offset(offset.result().to_vec()));
            }
        }
        _ => out.push(SolLine::Constant(formula.result().to_vec())),
    }
    Ok(())
}

//! Structured event emission with configurable selection.
//!
//! Each event renders as `## INFO` (a JSON header), an optional
//! `## SOLIDITY` decoding for slot events, one `## <VIEW>` section per
//! enabled shortened view, and `## FULL` when the full view is enabled; a
//! blank line terminates the event. JSON mode emits one object per event
//! with the same content.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use ethereum_types::{Address, H256};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    depop::DepOp,
    errors::TracerError,
    formula::{DepByte, Formula},
    output::OutputWriter,
    simple_db::SimpleDB,
    sol_view::SolView,
    transaction::LogRecord,
};

/// Event selection, parsed from the `logger` config object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    /// Hex backend-opcode bytes enabling shortened per-opcode events.
    #[serde(default)]
    pub opcodes_short: Vec<String>,
    /// Hex backend-opcode bytes enabling full per-opcode events.
    #[serde(default, rename = "opcodes")]
    pub opcodes_full: Vec<String>,

    #[serde(default)]
    pub final_slots_short: bool,
    #[serde(default, rename = "final_slots")]
    pub final_slots_full: bool,
    #[serde(default)]
    pub codes_short: bool,
    #[serde(default, rename = "codes")]
    pub codes_full: bool,
    #[serde(default)]
    pub return_data_short: bool,
    #[serde(default, rename = "return_data")]
    pub return_data_full: bool,
    #[serde(default)]
    pub logs_short: bool,
    #[serde(default, rename = "logs")]
    pub logs_full: bool,
    #[serde(default)]
    pub sol_view: bool,

    #[serde(default)]
    pub minimal_info: bool,
    #[serde(default)]
    pub omit_info: bool,
    #[serde(default)]
    pub omit_formulas: bool,
    #[serde(default)]
    pub output_format: String,
}

impl LoggerConfig {
    /// The selection used when the config omits the `logger` object.
    pub fn default_selection() -> Self {
        Self {
            final_slots_short: true,
            final_slots_full: true,
            return_data_full: true,
            logs_full: true,
            sol_view: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
struct LoggerContext {
    block: u64,
    timestamp: u64,
    origin: Address,
    tx_hash: H256,
    address: Address,
    address_version: u64,
    code_address: Address,
    code_hash: H256,
    initcode_hash: H256,
}

#[derive(Debug)]
pub struct Logger {
    cfg: LoggerConfig,
    opcodes_short: FxHashSet<u8>,
    opcodes_full: FxHashSet<u8>,
    format: OutputFormat,
    context: RefCell<LoggerContext>,
    writer: Rc<OutputWriter>,
}

#[derive(Serialize)]
struct InfoJson {
    event_type: String,
    short_types: BTreeMap<String, Vec<String>>,
    block: String,
    txhash: String,
    timestamp: u64,
    origin: String,
    address: String,
    address_version: u64,
    code_address: String,
    code_hash: String,
    initcode_hash: String,
}

#[derive(Serialize)]
struct MinimalInfoJson {
    event_type: String,
    address: String,
}

#[derive(Serialize)]
struct JsonEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    solidity: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    formulas: Option<BTreeMap<String, Vec<String>>>,
}

fn parse_opcode_list(list: &[String]) -> Result<FxHashSet<u8>, TracerError> {
    list.iter()
        .map(|s| {
            u8::from_str_radix(s, 16)
                .map_err(|_| TracerError::Config(format!("bad opcode hex byte: {s:?}")))
        })
        .collect()
}

impl Logger {
    pub fn new(cfg: LoggerConfig, writer: Rc<OutputWriter>) -> Result<Self, TracerError> {
        let opcodes_short = parse_opcode_list(&cfg.opcodes_short)?;
        let opcodes_full = parse_opcode_list(&cfg.opcodes_full)?;
        let format = match cfg.output_format.as_str() {
            "" | "text" => OutputFormat::Text,
            "json" => OutputFormat::Json,
            other => {
                return Err(TracerError::Config(format!(
                    "unknown output_format: {other:?}"
                )));
            }
        };
        Ok(Self {
            cfg,
            opcodes_short,
            opcodes_full,
            format,
            context: RefCell::new(LoggerContext::default()),
            writer,
        })
    }

    /// Remember the transaction-wide context fields.
    pub fn enter_context(&self, block: u64, timestamp: u64, origin: Address, tx_hash: H256) {
        let mut ctx = self.context.borrow_mut();
        ctx.block = block;
        ctx.timestamp = timestamp;
        ctx.origin = origin;
        ctx.tx_hash = tx_hash;
    }

    /// Update the executing-contract fields; called on every frame change.
    pub fn set_contract_address(
        &self,
        address: Address,
        address_version: u64,
        code_address: Address,
        code_hash: H256,
        initcode_hash: H256,
    ) {
        let mut ctx = self.context.borrow_mut();
        ctx.address = address;
        ctx.address_version = address_version;
        ctx.code_address = code_address;
        ctx.code_hash = code_hash;
        ctx.initcode_hash = initcode_hash;
    }

    pub fn log_opcode(&self, db: &SimpleDB, formula: &Formula) -> Result<(), TracerError> {
        let op = u8::from(formula.opcode());
        let full = self.opcodes_full.contains(&op);
        let short = self.opcodes_short.contains(&op);
        let ctx = self.context.borrow().clone();
        self.log_formulas_with_shorts(
            db,
            "opcode",
            ctx.address,
            ctx.address_version,
            ctx.code_address,
            std::slice::from_ref(formula),
            full,
            short,
        )
    }

    pub fn log_final_slot(
        &self,
        db: &SimpleDB,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        val: &[DepByte],
        _slot: H256,
    ) -> Result<(), TracerError> {
        let formula = db.formula_dep_with_shorts(val)?;
        self.log_formulas_with_shorts(
            db,
            "final_slot",
            addr,
            addr_version,
            code_addr,
            &[formula],
            self.cfg.final_slots_full,
            self.cfg.final_slots_short,
        )
    }

    pub fn log_final_code(
        &self,
        db: &SimpleDB,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        val: &[DepByte],
    ) -> Result<(), TracerError> {
        let formula = db.formula_dep_with_shorts(val)?;
        self.log_formulas_with_shorts(
            db,
            "final_code",
            addr,
            addr_version,
            code_addr,
            &[formula],
            self.cfg.codes_full,
            self.cfg.codes_short,
        )
    }

    pub fn log_return_data(
        &self,
        db: &SimpleDB,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        val: &[DepByte],
    ) -> Result<(), TracerError> {
        let formula = db.formula_dep_with_shorts(val)?;
        self.log_formulas_with_shorts(
            db,
            "return",
            addr,
            addr_version,
            code_addr,
            &[formula],
            self.cfg.return_data_full,
            self.cfg.return_data_short,
        )
    }

    pub fn log_log(&self, db: &SimpleDB, record: &LogRecord) -> Result<(), TracerError> {
        let mut formulas = Vec::with_capacity(1 + record.topics.len());
        formulas.push(record.data.clone());
        formulas.extend(record.topics.iter().cloned());
        self.log_formulas_with_shorts(
            db,
            "log",
            record.address,
            record.address_version,
            record.code_address,
            &formulas,
            self.cfg.logs_full,
            self.cfg.logs_short,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn log_formulas_with_shorts(
        &self,
        db: &SimpleDB,
        event_type: &str,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        formulas: &[Formula],
        full_enabled: bool,
        short_enabled: bool,
    ) -> Result<(), TracerError> {
        let mut views: BTreeMap<String, Vec<Formula>> = BTreeMap::new();
        if full_enabled {
            views.insert("full".to_string(), formulas.to_vec());
        }
        if short_enabled {
            for short in db.shorts() {
                let mut shortened = Vec::with_capacity(formulas.len());
                for formula in formulas {
                    let entry = short.load_entry(formula.hash())?;
                    shortened.push(db.get_formula(entry.hash)?);
                }
                views.insert(short.name().to_string(), shortened);
            }
        } else if self.cfg.sol_view && full_enabled {
            // The Solidity decoding reads the crypto view even when the
            // shortened sections themselves are disabled.
            for short in db.shorts() {
                if short.name() != "crypto" {
                    continue;
                }
                let mut shortened = Vec::with_capacity(formulas.len());
                for formula in formulas {
                    let entry = short.load_entry(formula.hash())?;
                    shortened.push(db.get_formula(entry.hash)?);
                }
                views.insert(short.name().to_string(), shortened);
                break;
            }
        }
        if views.is_empty() {
            return Ok(());
        }
        self.log_formulas(db, event_type, addr, addr_version, code_addr, &views)
    }

    fn log_formulas(
        &self,
        db: &SimpleDB,
        event_type: &str,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        views: &BTreeMap<String, Vec<Formula>>,
    ) -> Result<(), TracerError> {
        match self.format {
            OutputFormat::Text => self.log_text(db, event_type, addr, addr_version, code_addr, views),
            OutputFormat::Json => self.log_json(db, event_type, addr, addr_version, code_addr, views),
        }
    }

    fn info_value(
        &self,
        event_type: &str,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        views: &BTreeMap<String, Vec<Formula>>,
    ) -> Result<serde_json::Value, TracerError> {
        let ctx = self.context.borrow();
        let value = if self.cfg.minimal_info {
            serde_json::to_value(MinimalInfoJson {
                event_type: event_type.to_string(),
                address: hex::encode(addr),
            })
        } else {
            let short_types = views
                .iter()
                .map(|(name, formulas)| {
                    (
                        name.clone(),
                        formulas
                            .iter()
                            .map(|f| hex::encode(f.hash()))
                            .collect::<Vec<_>>(),
                    )
                })
                .collect();
            serde_json::to_value(InfoJson {
                event_type: event_type.to_string(),
                short_types,
                block: ctx.block.to_string(),
                txhash: hex::encode(ctx.tx_hash),
                timestamp: ctx.timestamp,
                origin: hex::encode(ctx.origin),
                address: hex::encode(addr),
                address_version: addr_version,
                code_address: hex::encode(code_addr),
                code_hash: hex::encode(ctx.code_hash),
                initcode_hash: hex::encode(ctx.initcode_hash),
            })
        }
        .map_err(|e| TracerError::Corruption(format!("info serialization: {e}")))?;
        Ok(value)
    }

    fn solidity_lines(
        &self,
        db: &SimpleDB,
        views: &BTreeMap<String, Vec<Formula>>,
    ) -> Result<Option<Vec<String>>, TracerError> {
        if !self.cfg.sol_view {
            return Ok(None);
        }
        let Some(crypto) = views.get("crypto").and_then(|v| v.first()) else {
            return Ok(None);
        };
        if !matches!(crypto.opcode(), DepOp::SLoad | DepOp::SStore) {
            return Ok(None);
        }
        let [value_hash, slot_hash] = crypto.operands() else {
            return Ok(None);
        };
        let slot_formula = db.get_formula(*slot_hash)?;
        let value_formula = db.get_formula(*value_hash)?;
        let view = SolView::build(db, &slot_formula)?;

        let mut lines = vec![format!(
            "# {} {} => {}",
            crypto.opcode().name(),
            hex::encode(slot_formula.result()),
            hex::encode(value_formula.result()),
        )];
        lines.extend(view.lines());
        Ok(Some(lines))
    }

    fn log_text(
        &self,
        db: &SimpleDB,
        event_type: &str,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        views: &BTreeMap<String, Vec<Formula>>,
    ) -> Result<(), TracerError> {
        if !self.cfg.omit_info {
            self.writer.println("## INFO");
            let info = self.info_value(event_type, addr, addr_version, code_addr, views)?;
            let rendered = serde_json::to_string_pretty(&info)
                .map_err(|e| TracerError::Corruption(format!("info serialization: {e}")))?;
            self.writer.println(&rendered);
        }

        if let Some(lines) = self.solidity_lines(db, views)? {
            self.writer.println("## SOLIDITY");
            for line in lines {
                self.writer.println(&line);
            }
        }

        if !self.cfg.omit_formulas {
            for (name, formulas) in views {
                if name == "full" {
                    continue;
                }
                for formula in formulas {
                    self.writer.println(&format!("## {}", name.to_uppercase()));
                    db.print(formula)?;
                }
            }
            if let Some(formulas) = views.get("full") {
                for formula in formulas {
                    self.writer.println("## FULL");
                    db.print(formula)?;
                }
            }
        }

        self.writer.println("");
        Ok(())
    }

    fn log_json(
        &self,
        db: &SimpleDB,
        event_type: &str,
        addr: Address,
        addr_version: u64,
        code_addr: Address,
        views: &BTreeMap<String, Vec<Formula>>,
    ) -> Result<(), TracerError> {
        let info = if self.cfg.omit_info {
            None
        } else {
            Some(self.info_value(event_type, addr, addr_version, code_addr, views)?)
        };
        let formulas = if self.cfg.omit_formulas {
            None
        } else {
            let mut rendered = BTreeMap::new();
            for (name, formulas) in views {
                let mut trees = Vec::with_capacity(formulas.len());
                for formula in formulas {
                    trees.push(db.render(formula)?);
                }
                rendered.insert(name.clone(), trees);
            }
            Some(rendered)
        };
        let event = JsonEvent {
            info,
            solidity: self.solidity_lines(db, views)?,
            formulas,
        };
        let rendered = serde_json::to_string(&event)
            .map_err(|e| TracerError::Corruption(format!("event serialization: {e}")))?;
        self.writer.println(&rendered);
        Ok(())
    }
}

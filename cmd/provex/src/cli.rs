use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::PathBuf,
    rc::Rc,
};

use bytes::Bytes;
use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use ethereum_types::Address;
use eyre::WrapErr;
use tracing::info;

use provex_tracer::{DepHandler, StateReader, TracerConfig, TxStart};

use crate::events::{
    HostEvent, parse_address, parse_bytes, parse_hash, parse_opcode, parse_word,
};

#[derive(ClapParser)]
#[command(name = "provex", author = "provex contributors", version, about = "EVM provenance tracer")]
pub struct CLI {
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    /// Replay a JSONL host-event stream through the tracer.
    Trace(TraceOptions),
}

#[derive(ClapParser, Debug)]
pub struct TraceOptions {
    #[arg(
        long = "config",
        value_name = "CONFIG_FILE",
        help = "JSON tracer config (kv, logger, output)",
        env = "PROVEX_CONFIG"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "kv.engine",
        value_name = "ENGINE",
        help = "Override the kv engine: rocksdb, memory, amnesia or remote",
        env = "PROVEX_KV_ENGINE"
    )]
    pub kv_engine: Option<String>,
    #[arg(
        long = "kv.root",
        value_name = "PATH_OR_URL",
        help = "Override the kv root (database directory or remote base URL)",
        env = "PROVEX_KV_ROOT"
    )]
    pub kv_root: Option<String>,
    #[arg(
        long = "output",
        value_name = "SINK",
        help = "Override the output sink: empty for stdout, http://host:port, or a file path",
        env = "PROVEX_OUTPUT"
    )]
    pub output: Option<String>,
    #[arg(
        value_name = "EVENTS_FILE",
        help = "JSONL event stream; stdin when omitted"
    )]
    pub events: Option<PathBuf>,
}

/// Per-transaction state reader backed by the nonce/code maps of the
/// `tx_start` event.
struct ReplayReader {
    nonces: HashMap<Address, u64>,
    codes: HashMap<Address, Bytes>,
}

impl StateReader for ReplayReader {
    fn get_nonce(&self, addr: Address) -> u64 {
        self.nonces.get(&addr).copied().unwrap_or(0)
    }

    fn get_code(&self, addr: Address) -> Bytes {
        self.codes.get(&addr).cloned().unwrap_or_default()
    }
}

pub fn run_trace(opts: TraceOptions) -> eyre::Result<()> {
    let mut config = match &opts.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading config {}", path.display()))?;
            TracerConfig::from_json(&raw)?
        }
        None => TracerConfig::default(),
    };
    if let Some(engine) = opts.kv_engine {
        config.kv.engine = engine;
    }
    if let Some(root) = opts.kv_root {
        config.kv.root = root;
    }
    if let Some(output) = opts.output {
        config.output = output;
    }

    let mut handler = DepHandler::new(config)?;

    let reader: Box<dyn Read> = match &opts.events {
        Some(path) => Box::new(
            File::open(path).wrap_err_with(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };

    let mut replayer = Replayer {
        handler: &mut handler,
        block_number: 0,
        block_timestamp: 0,
    };

    let mut events = 0u64;
    for (line_number, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: HostEvent = serde_json::from_str(&line)
            .wrap_err_with(|| format!("event at line {}", line_number + 1))?;
        replayer
            .apply(event)
            .wrap_err_with(|| format!("event at line {}", line_number + 1))?;
        events += 1;
    }
    info!(events, "replay finished");
    Ok(())
}

struct Replayer<'a> {
    handler: &'a mut DepHandler,
    block_number: u64,
    block_timestamp: u64,
}

impl Replayer<'_> {
    fn apply(&mut self, event: HostEvent) -> eyre::Result<()> {
        let handler = &mut *self.handler;
        match event {
            HostEvent::BlockStart { number, timestamp } => {
                self.block_number = number;
                self.block_timestamp = timestamp;
                handler.on_block_start(number, timestamp)?;
            }
            HostEvent::BlockEnd => handler.on_block_end(),
            HostEvent::TxStart {
                is_create,
                address,
                input,
                origin,
                tx_hash,
                code,
                is_cancun,
                is_london,
                nonces,
                codes,
            } => {
                let mut nonce_map = HashMap::new();
                for (addr, nonce) in nonces {
                    nonce_map.insert(parse_address(&addr)?, nonce);
                }
                let mut code_map = HashMap::new();
                for (addr, code) in codes {
                    code_map.insert(parse_address(&addr)?, parse_bytes(&code)?);
                }
                let reader = Rc::new(ReplayReader {
                    nonces: nonce_map,
                    codes: code_map,
                });
                let tx = TxStart {
                    block_number: self.block_number,
                    timestamp: self.block_timestamp,
                    origin: parse_address(&origin)?,
                    tx_hash: parse_hash(&tx_hash)?,
                    is_create,
                    address: parse_address(&address)?,
                    input: parse_bytes(&input)?,
                    code: parse_bytes(&code)?,
                    is_cancun,
                    is_london,
                };
                handler.on_tx_start(tx, Some(reader))?;
            }
            HostEvent::TxEnd => handler.on_tx_end()?,
            HostEvent::Opcode {
                pc,
                op,
                cost,
                stack,
                memory,
                address,
                error,
            } => {
                let stack = stack
                    .iter()
                    .map(|word| parse_word(word))
                    .collect::<eyre::Result<Vec<_>>>()?;
                let memory = parse_bytes(&memory)?;
                handler.on_opcode(
                    pc,
                    parse_opcode(&op)?,
                    cost,
                    &stack,
                    &memory,
                    parse_address(&address)?,
                    error,
                )?;
            }
            HostEvent::Enter { to, input } => {
                let input = parse_bytes(&input)?;
                handler.on_enter(parse_address(&to)?, &input);
            }
            HostEvent::Fault { op } => handler.on_fault(parse_opcode(&op)?)?,
            HostEvent::Exit { output, error } => {
                let output = parse_bytes(&output)?;
                handler.on_exit(&output, error)?;
            }
        }
        Ok(())
    }
}

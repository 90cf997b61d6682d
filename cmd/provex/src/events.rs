//! The JSONL host-event stream the replay driver consumes.
//!
//! One JSON object per line, tagged with `type`. Byte blobs and hashes are
//! `0x`-prefixed hex; stack words may omit leading zeroes.

use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use eyre::{WrapErr, eyre};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    BlockStart {
        number: u64,
        timestamp: u64,
    },
    BlockEnd,
    TxStart {
        #[serde(default)]
        is_create: bool,
        address: String,
        #[serde(default)]
        input: String,
        origin: String,
        tx_hash: String,
        #[serde(default)]
        code: String,
        #[serde(default)]
        is_cancun: bool,
        #[serde(default)]
        is_london: bool,
        /// Account nonces the CREATE handler may ask for.
        #[serde(default)]
        nonces: HashMap<String, u64>,
        /// Pre-existing code the EXTCODE* handlers may ask for.
        #[serde(default)]
        codes: HashMap<String, String>,
    },
    TxEnd,
    Opcode {
        pc: u64,
        op: String,
        cost: u64,
        #[serde(default)]
        stack: Vec<String>,
        #[serde(default)]
        memory: String,
        address: String,
        #[serde(default)]
        error: bool,
    },
    Enter {
        to: String,
        #[serde(default)]
        input: String,
    },
    Fault {
        op: String,
    },
    Exit {
        #[serde(default)]
        output: String,
        #[serde(default)]
        error: bool,
    },
}

pub fn parse_bytes(raw: &str) -> eyre::Result<Bytes> {
    if raw.is_empty() || raw == "0x" {
        return Ok(Bytes::new());
    }
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    Ok(Bytes::from(
        hex::decode(raw).wrap_err_with(|| format!("bad hex blob: {raw:?}"))?,
    ))
}

pub fn parse_address(raw: &str) -> eyre::Result<Address> {
    let bytes = parse_bytes(raw)?;
    if bytes.len() != 20 {
        return Err(eyre!("address must be 20 bytes: {raw:?}"));
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_hash(raw: &str) -> eyre::Result<H256> {
    let bytes = parse_bytes(raw)?;
    if bytes.len() != 32 {
        return Err(eyre!("hash must be 32 bytes: {raw:?}"));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_word(raw: &str) -> eyre::Result<U256> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    U256::from_str_radix(raw, 16).wrap_err_with(|| format!("bad stack word: {raw:?}"))
}

pub fn parse_opcode(raw: &str) -> eyre::Result<u8> {
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    u8::from_str_radix(raw, 16).wrap_err_with(|| format!("bad opcode byte: {raw:?}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_opcode_event() {
        let line = r#"{"type":"opcode","pc":2,"op":"0x60","cost":3,
            "stack":["0x5"],"memory":"0x","address":"0x00000000000000000000000000000000000000aa"}"#;
        let event: HostEvent = serde_json::from_str(line).unwrap();
        match event {
            HostEvent::Opcode { pc, op, stack, .. } => {
                assert_eq!(pc, 2);
                assert_eq!(parse_opcode(&op).unwrap(), 0x60);
                assert_eq!(parse_word(&stack[0]).unwrap(), U256::from(5));
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn parses_blobs_and_defaults() {
        assert!(parse_bytes("").unwrap().is_empty());
        assert!(parse_bytes("0x").unwrap().is_empty());
        assert_eq!(parse_bytes("0xdead").unwrap().as_ref(), &[0xDE, 0xAD]);
        assert!(parse_address("0x1234").is_err());
    }
}

//! Hashing and contract-address derivation.
//!
//! The formula DAG hashes with SHA-256 — its hash space is internal and
//! independent of the EVM's. Keccak-256 appears only where the EVM itself
//! prescribes it: CREATE / CREATE2 address derivation.

use ethereum_types::{Address, H256};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Keccak-256 over the concatenation of the given chunks.
pub fn keccak256(chunks: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().into()
}

/// SHA-256 code hash, used for the `code_hashes` table records.
pub fn code_hash(code: &[u8]) -> H256 {
    H256(Sha256::digest(code).into())
}

/// CREATE: `last20(keccak256(rlp([sender, nonce])))`.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let encoded = rlp_list(&[rlp_bytes(sender.as_bytes()), rlp_u64(nonce)]);
    let hash = keccak256(&[&encoded]);
    Address::from_slice(&hash[12..])
}

/// CREATE2: `last20(keccak256(0xff ‖ sender ‖ salt ‖ keccak256(initcode)))`.
pub fn create2_address(sender: Address, salt: H256, initcode_hash: [u8; 32]) -> Address {
    let hash = keccak256(&[&[0xff], sender.as_bytes(), salt.as_bytes(), &initcode_hash]);
    Address::from_slice(&hash[12..])
}

// Minimal RLP: just enough for the CREATE derivation (a 20-byte string and
// a u64 scalar inside one list).

fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    match data {
        [b] if *b < 0x80 => vec![*b],
        _ if data.len() < 56 => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(0x80 + data.len() as u8);
            out.extend_from_slice(data);
            out
        }
        _ => {
            let len_bytes = be_trimmed(data.len() as u64);
            let mut out = Vec::with_capacity(1 + len_bytes.len() + data.len());
            out.push(0xB7 + len_bytes.len() as u8);
            out.extend_from_slice(&len_bytes);
            out.extend_from_slice(data);
            out
        }
    }
}

fn rlp_u64(value: u64) -> Vec<u8> {
    rlp_bytes(&be_trimmed(value))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(1 + 8 + payload_len);
    if payload_len < 56 {
        out.push(0xC0 + payload_len as u8);
    } else {
        let len_bytes = be_trimmed(payload_len as u64);
        out.push(0xF7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// Big-endian bytes of `value` with leading zeroes stripped (empty for 0).
fn be_trimmed(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(8);
    bytes[start..].to_vec()
}

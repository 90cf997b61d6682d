//! Transaction-scoped buffered state over the formula store.
//!
//! All slot/code/transient writes of a transaction land here and only reach
//! `SimpleDB` at `commit()`. Reads go through with memoization. Call frames
//! take a checkpoint on entry; a revert rolls the undo journal back to it,
//! which is observably the same as snapshotting the whole overlay but costs
//! only the writes made since.

use std::rc::Rc;

use ethereum_types::{Address, H256};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    crypto::code_hash,
    errors::TracerError,
    formula::{DepByte, init_dep_bytes},
    simple_db::SimpleDB,
};

type SlotKey = (Address, H256);

#[derive(Debug, Clone)]
pub struct OverlaySlot {
    pub data: Vec<DepByte>,
    pub code_addr: Address,
}

#[derive(Debug, Clone)]
pub struct OverlayCode {
    pub data: Vec<DepByte>,
    pub code_addr: Address,
    pub code_hash: H256,
    pub initcode_hash: H256,
}

#[derive(Debug)]
enum UndoRecord {
    SlotWrite {
        key: SlotKey,
        prev: Option<OverlaySlot>,
        was_updated: bool,
    },
    CodeWrite {
        addr: Address,
        prev: Option<OverlayCode>,
        was_updated: bool,
        was_created: bool,
    },
    TransientWrite {
        key: SlotKey,
        prev: Option<Vec<DepByte>>,
    },
    Destruct {
        addr: Address,
        was_destructed: bool,
    },
}

/// Journal position taken at call entry.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint(usize);

#[derive(Debug)]
pub struct OverlayDB {
    db: Rc<SimpleDB>,
    slots: FxHashMap<SlotKey, OverlaySlot>,
    updated_slots: FxHashSet<SlotKey>,
    codes: FxHashMap<Address, OverlayCode>,
    updated_codes: FxHashSet<Address>,
    selfdestructed: FxHashSet<Address>,
    created: FxHashSet<Address>,
    versions: FxHashMap<Address, u64>,
    transient: FxHashMap<SlotKey, Vec<DepByte>>,
    journal: Vec<UndoRecord>,
}

impl OverlayDB {
    pub fn new(db: Rc<SimpleDB>) -> Self {
        Self {
            db,
            slots: FxHashMap::default(),
            updated_slots: FxHashSet::default(),
            codes: FxHashMap::default(),
            updated_codes: FxHashSet::default(),
            selfdestructed: FxHashSet::default(),
            created: FxHashSet::default(),
            versions: FxHashMap::default(),
            transient: FxHashMap::default(),
            journal: Vec::new(),
        }
    }

    pub fn get_address_version(&mut self, addr: Address) -> Result<u64, TracerError> {
        if let Some(version) = self.versions.get(&addr) {
            return Ok(*version);
        }
        let version = self.db.get_address_version(addr)?;
        self.versions.insert(addr, version);
        Ok(version)
    }

    /// Read-through slot lookup; misses are fetched from the store and
    /// memoized.
    pub fn get_slot(&mut self, addr: Address, slot: H256) -> Result<OverlaySlot, TracerError> {
        let key = (addr, slot);
        if let Some(value) = self.slots.get(&key) {
            return Ok(value.clone());
        }
        let value = OverlaySlot {
            data: self.db.get_slot(addr, slot)?,
            code_addr: Address::zero(),
        };
        self.slots.insert(key, value.clone());
        Ok(value)
    }

    pub fn set_slot(&mut self, addr: Address, code_addr: Address, slot: H256, val: Vec<DepByte>) {
        let key = (addr, slot);
        let prev = self.slots.insert(
            key,
            OverlaySlot {
                data: val,
                code_addr,
            },
        );
        let was_updated = !self.updated_slots.insert(key);
        self.journal.push(UndoRecord::SlotWrite {
            key,
            prev,
            was_updated,
        });
    }

    /// Transient storage defaults to 32 implicit-zero bytes.
    pub fn get_transient(&mut self, addr: Address, slot: H256) -> Vec<DepByte> {
        self.transient
            .entry((addr, slot))
            .or_insert_with(|| init_dep_bytes(32))
            .clone()
    }

    pub fn set_transient(&mut self, addr: Address, slot: H256, val: Vec<DepByte>) {
        let key = (addr, slot);
        let prev = self.transient.insert(key, val);
        self.journal.push(UndoRecord::TransientWrite { key, prev });
    }

    /// Read-through code lookup; misses are fetched from the store and
    /// memoized.
    pub fn get_code(&mut self, addr: Address) -> Result<OverlayCode, TracerError> {
        if let Some(code) = self.codes.get(&addr) {
            return Ok(code.clone());
        }
        let (stored_code_hash, initcode_hash, data) = self.db.get_code(addr)?;
        let code = OverlayCode {
            data,
            code_addr: Address::zero(),
            code_hash: stored_code_hash,
            initcode_hash,
        };
        self.codes.insert(addr, code.clone());
        Ok(code)
    }

    /// Cache a shadow synthesized from pre-existing code bytes. Not a write:
    /// it is not journaled and never committed.
    pub fn memoize_code(&mut self, addr: Address, data: Vec<DepByte>, hash: H256) {
        self.codes.insert(
            addr,
            OverlayCode {
                data,
                code_addr: Address::zero(),
                code_hash: hash,
                initcode_hash: H256::zero(),
            },
        );
    }

    /// Deployed-code write; also marks the address as created in this
    /// transaction (EIP-6780 relies on that).
    pub fn set_code(
        &mut self,
        addr: Address,
        code_addr: Address,
        val: Vec<DepByte>,
        val_bytes: &[u8],
        initcode_hash: H256,
    ) {
        let prev = self.codes.insert(
            addr,
            OverlayCode {
                data: val,
                code_addr,
                code_hash: code_hash(val_bytes),
                initcode_hash,
            },
        );
        let was_updated = !self.updated_codes.insert(addr);
        let was_created = !self.created.insert(addr);
        self.journal.push(UndoRecord::CodeWrite {
            addr,
            prev,
            was_updated,
            was_created,
        });
    }

    pub fn destruct(&mut self, addr: Address) {
        let was_destructed = !self.selfdestructed.insert(addr);
        self.journal.push(UndoRecord::Destruct {
            addr,
            was_destructed,
        });
    }

    pub fn created(&self, addr: Address) -> bool {
        self.created.contains(&addr)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Undo every write made after `checkpoint`.
    pub fn rollback_to(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.0 {
            let Some(record) = self.journal.pop() else {
                break;
            };
            match record {
                UndoRecord::SlotWrite {
                    key,
                    prev,
                    was_updated,
                } => {
                    match prev {
                        Some(value) => {
                            self.slots.insert(key, value);
                        }
                        None => {
                            self.slots.remove(&key);
                        }
                    }
                    if !was_updated {
                        self.updated_slots.remove(&key);
                    }
                }
                UndoRecord::CodeWrite {
                    addr,
                    prev,
                    was_updated,
                    was_created,
                } => {
                    match prev {
                        Some(code) => {
                            self.codes.insert(addr, code);
                        }
                        None => {
                            self.codes.remove(&addr);
                        }
                    }
                    if !was_updated {
                        self.updated_codes.remove(&addr);
                    }
                    if !was_created {
                        self.created.remove(&addr);
                    }
                }
                UndoRecord::TransientWrite { key, prev } => match prev {
                    Some(value) => {
                        self.transient.insert(key, value);
                    }
                    None => {
                        self.transient.remove(&key);
                    }
                },
                UndoRecord::Destruct {
                    addr,
                    was_destructed,
                } => {
                    if !was_destructed {
                        self.selfdestructed.remove(&addr);
                    }
                }
            }
        }
    }

    /// Flush every surviving write into the store, emitting the final-state
    /// events, then bump versions for the self-destructed addresses.
    /// Iteration is key-ordered so output is deterministic.
    pub fn commit(&mut self) -> Result<(), TracerError> {
        let mut slot_keys: Vec<SlotKey> = self.updated_slots.iter().copied().collect();
        slot_keys.sort();
        for key in slot_keys {
            let (addr, slot) = key;
            let Some(value) = self.slots.get(&key).cloned() else {
                continue;
            };
            self.db.commit_dep_bytes_with_shorts(&value.data)?;
            self.db.set_slot(addr, slot, &value.data)?;
            let version = self.get_address_version(addr)?;
            self.db.logger().log_final_slot(
                &self.db,
                addr,
                version,
                value.code_addr,
                &value.data,
                slot,
            )?;
        }

        let mut code_addrs: Vec<Address> = self.updated_codes.iter().copied().collect();
        code_addrs.sort();
        for addr in code_addrs {
            let Some(code) = self.codes.get(&addr).cloned() else {
                continue;
            };
            self.db.commit_dep_bytes_with_shorts(&code.data)?;
            self.db
                .set_code(addr, &code.data, code.code_hash, code.initcode_hash)?;
            let version = self.get_address_version(addr)?;
            self.db
                .logger()
                .log_final_code(&self.db, addr, version, code.code_addr, &code.data)?;
        }

        let mut destructed: Vec<Address> = self.selfdestructed.iter().copied().collect();
        destructed.sort();
        for addr in destructed {
            self.db.increase_address_version(addr)?;
        }
        Ok(())
    }
}

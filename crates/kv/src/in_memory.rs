use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use rustc_hash::FxHashMap;

use crate::{KvEngine, KvError};

/// Process-lifetime in-memory engine. Tables are plain ordered maps behind
/// one lock; the tracer is single-threaded, so contention is not a concern.
#[derive(Debug)]
pub struct InMemoryEngine {
    tables: Mutex<FxHashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryEngine {
    pub fn new(tables: &[String]) -> Self {
        let mut map = FxHashMap::default();
        for name in tables {
            map.insert(name.clone(), BTreeMap::new());
        }
        Self {
            tables: Mutex::new(map),
        }
    }
}

impl KvEngine for InMemoryEngine {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let t = tables
            .get(table)
            .ok_or_else(|| KvError::UnknownTable(table.to_string()))?;
        Ok(t.get(key).cloned())
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let t = tables
            .get_mut(table)
            .ok_or_else(|| KvError::UnknownTable(table.to_string()))?;
        t.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: &str, key: &[u8]) -> Result<(), KvError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let t = tables
            .get_mut(table)
            .ok_or_else(|| KvError::UnknownTable(table.to_string()))?;
        t.remove(key);
        Ok(())
    }
}

/// In-memory engine that forgets every write. Useful when the operator wants
/// the event stream but no persisted state at all.
#[derive(Debug)]
pub struct AmnesiaEngine;

impl KvEngine for AmnesiaEngine {
    fn get(&self, _table: &str, _key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(None)
    }

    fn put(&self, _table: &str, _key: &[u8], _value: &[u8]) -> Result<(), KvError> {
        Ok(())
    }

    fn delete(&self, _table: &str, _key: &[u8]) -> Result<(), KvError> {
        Ok(())
    }
}

use std::{fmt::Debug, str::FromStr, sync::Arc};

use tracing::debug;

use crate::{
    KvError,
    in_memory::{AmnesiaEngine, InMemoryEngine},
    remote::RemoteEngine,
    rocks::RocksDbEngine,
};

/// A key/value engine holding a fixed set of named tables.
///
/// Engines are shared behind an `Arc`; interior mutability is the engine's
/// own concern. Every error is fatal for the caller: a tracer cannot produce
/// a correct result once its state store misbehaves.
pub trait KvEngine: Debug + Send + Sync {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn delete(&self, table: &str, key: &[u8]) -> Result<(), KvError>;
}

/// Backend selection, parsed from the `kv.engine` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    RocksDb,
    Memory,
    Amnesia,
    Remote,
}

impl EngineKind {
    /// Whether the engine needs a `kv.root` (path or address).
    pub fn needs_root(&self) -> bool {
        matches!(self, EngineKind::RocksDb | EngineKind::Remote)
    }
}

impl FromStr for EngineKind {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rocksdb" => Ok(EngineKind::RocksDb),
            "memory" => Ok(EngineKind::Memory),
            "amnesia" => Ok(EngineKind::Amnesia),
            "remote" => Ok(EngineKind::Remote),
            other => Err(KvError::UnknownEngine(other.to_string())),
        }
    }
}

/// An opened store: an engine plus the tables it was opened with.
#[derive(Debug, Clone)]
pub struct KvStore {
    engine: Arc<dyn KvEngine>,
}

impl KvStore {
    /// Open a store with the given engine and table set.
    ///
    /// `root` is the database directory for `rocksdb` and the base URL for
    /// `remote`; the in-memory engines ignore it.
    pub fn open(kind: EngineKind, root: &str, tables: &[String]) -> Result<Self, KvError> {
        if kind.needs_root() && root.is_empty() {
            return Err(KvError::MissingRoot(match kind {
                EngineKind::RocksDb => "rocksdb",
                _ => "remote",
            }));
        }
        debug!(?kind, root, ?tables, "opening kv store");
        let engine: Arc<dyn KvEngine> = match kind {
            EngineKind::RocksDb => Arc::new(RocksDbEngine::open(root, tables)?),
            EngineKind::Memory => Arc::new(InMemoryEngine::new(tables)),
            EngineKind::Amnesia => Arc::new(AmnesiaEngine),
            EngineKind::Remote => Arc::new(RemoteEngine::new(root, tables)?),
        };
        Ok(Self { engine })
    }

    /// Handle for one named table.
    pub fn table(&self, name: &str) -> Table {
        Table {
            engine: self.engine.clone(),
            name: name.to_string(),
        }
    }
}

/// A cheap handle onto one table of an open store.
#[derive(Debug, Clone)]
pub struct Table {
    engine: Arc<dyn KvEngine>,
    name: String,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.engine.get(&self.name, key)
    }

    /// Read a key that must exist. A miss means the store lost committed
    /// state, which the caller treats as corruption.
    pub fn get_required(&self, key: &[u8]) -> Result<Vec<u8>, KvError> {
        self.engine
            .get(&self.name, key)?
            .ok_or_else(|| KvError::MissingKey {
                table: self.name.clone(),
                key: key.to_vec(),
            })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.engine.put(&self.name, key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.engine.delete(&self.name, key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tables() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string()]
    }

    #[test]
    fn memory_round_trip() {
        let store = KvStore::open(EngineKind::Memory, "", &tables()).unwrap();
        let alpha = store.table("alpha");
        let beta = store.table("beta");

        alpha.put(b"k", b"v1").unwrap();
        beta.put(b"k", b"v2").unwrap();

        assert_eq!(alpha.get(b"k").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(beta.get(b"k").unwrap(), Some(b"v2".to_vec()));

        alpha.delete(b"k").unwrap();
        assert_eq!(alpha.get(b"k").unwrap(), None);
        assert_eq!(beta.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn memory_missing_required_key() {
        let store = KvStore::open(EngineKind::Memory, "", &tables()).unwrap();
        let err = store.table("alpha").get_required(b"absent").unwrap_err();
        assert!(matches!(err, KvError::MissingKey { .. }));
    }

    #[test]
    fn amnesia_discards_writes() {
        let store = KvStore::open(EngineKind::Amnesia, "", &tables()).unwrap();
        let alpha = store.table("alpha");
        alpha.put(b"k", b"v").unwrap();
        assert_eq!(alpha.get(b"k").unwrap(), None);
    }

    #[test]
    fn unknown_engine_is_rejected() {
        assert!(matches!(
            "leveldb".parse::<EngineKind>(),
            Err(KvError::UnknownEngine(_))
        ));
    }

    #[test]
    fn durable_engine_requires_root() {
        let err = KvStore::open(EngineKind::RocksDb, "", &tables()).unwrap_err();
        assert!(matches!(err, KvError::MissingRoot(_)));
    }

    #[test]
    fn rocksdb_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        {
            let store = KvStore::open(EngineKind::RocksDb, &root, &tables()).unwrap();
            store.table("alpha").put(b"k", b"v").unwrap();
        }
        // Reopen: data survives.
        let store = KvStore::open(EngineKind::RocksDb, &root, &tables()).unwrap();
        assert_eq!(store.table("alpha").get(b"k").unwrap(), Some(b"v".to_vec()));
        store.table("alpha").delete(b"k").unwrap();
        assert_eq!(store.table("alpha").get(b"k").unwrap(), None);
    }
}

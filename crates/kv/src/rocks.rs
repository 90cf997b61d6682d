use std::path::Path;

use rocksdb::{DB, Options};

use crate::{KvEngine, KvError};

/// On-disk LSM engine. Each logical table is a RocksDB column family,
/// created when the store is opened.
#[derive(Debug)]
pub struct RocksDbEngine {
    db: DB,
}

impl RocksDbEngine {
    pub fn open(root: &str, tables: &[String]) -> Result<Self, KvError> {
        std::fs::create_dir_all(Path::new(root))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, root, tables).map_err(|e| KvError::RocksDb(e.to_string()))?;
        Ok(Self { db })
    }

    fn cf(&self, table: &str) -> Result<&rocksdb::ColumnFamily, KvError> {
        self.db
            .cf_handle(table)
            .ok_or_else(|| KvError::UnknownTable(table.to_string()))
    }
}

impl KvEngine for RocksDbEngine {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let cf = self.cf(table)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| KvError::RocksDb(e.to_string()))
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let cf = self.cf(table)?;
        self.db
            .put_cf(cf, key, value)
            .map_err(|e| KvError::RocksDb(e.to_string()))
    }

    fn delete(&self, table: &str, key: &[u8]) -> Result<(), KvError> {
        let cf = self.cf(table)?;
        self.db
            .delete_cf(cf, key)
            .map_err(|e| KvError::RocksDb(e.to_string()))
    }
}

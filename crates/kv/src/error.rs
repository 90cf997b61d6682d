#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Unknown kv engine: {0}")]
    UnknownEngine(String),

    #[error("kv root is not set (required by the {0} engine)")]
    MissingRoot(&'static str),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Key not found in table {table}: {}", hex::encode(.key))]
    MissingKey { table: String, key: Vec<u8> },

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Remote kv error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

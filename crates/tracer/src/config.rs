//! Tracer configuration, deserialized from the JSON the host (CLI or FFI)
//! passes at construction.

use serde::Deserialize;

use crate::{errors::TracerError, logger::LoggerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KvConfig {
    /// Backend identifier: `rocksdb`, `memory`, `amnesia` or `remote`.
    #[serde(default)]
    pub engine: String,
    /// Database directory (`rocksdb`) or base URL (`remote`).
    #[serde(default)]
    pub root: String,
}

impl KvConfig {
    pub fn engine_kind(&self) -> Result<provex_kv::EngineKind, TracerError> {
        if self.engine.is_empty() {
            return Err(TracerError::Config("kv engine is not set".to_string()));
        }
        Ok(self.engine.parse()?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TracerConfig {
    #[serde(default)]
    pub kv: KvConfig,
    /// Event selection; `None` uses the default selection (final slots,
    /// return data, logs, Solidity view).
    #[serde(default)]
    pub logger: Option<LoggerConfig>,
    /// Output sink: empty → stdout, `http://host:port` → HTTP page, else a
    /// file path.
    #[serde(default)]
    pub output: String,
}

impl TracerConfig {
    pub fn from_json(raw: &str) -> Result<Self, TracerError> {
        serde_json::from_str(raw)
            .map_err(|e| TracerError::Config(format!("failed to parse config: {e}")))
    }

    /// In-memory engine, default logging. The usual test configuration.
    pub fn in_memory() -> Self {
        Self {
            kv: KvConfig {
                engine: "memory".to_string(),
                root: String::new(),
            },
            logger: None,
            output: String::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"{
            "kv": {"engine": "memory"},
            "logger": {
                "opcodes": ["bc", "e1"],
                "final_slots": true,
                "final_slots_short": true,
                "sol_view": true,
                "output_format": "text"
            },
            "output": ""
        }"#;
        let config = TracerConfig::from_json(raw).unwrap();
        assert_eq!(config.kv.engine, "memory");
        let logger = config.logger.unwrap();
        assert_eq!(logger.opcodes_full, vec!["bc", "e1"]);
        assert!(logger.final_slots_full);
        assert!(logger.sol_view);
    }

    #[test]
    fn missing_engine_is_fatal() {
        let config = TracerConfig::from_json("{}").unwrap();
        assert!(config.kv.engine_kind().is_err());
    }

    #[test]
    fn unknown_logger_key_is_rejected() {
        let raw = r#"{"kv": {"engine": "memory"}, "logger": {"no_such_key": true}}"#;
        assert!(TracerConfig::from_json(raw).is_err());
    }
}

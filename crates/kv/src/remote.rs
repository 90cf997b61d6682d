use reqwest::{StatusCode, blocking::Client};

use crate::{KvEngine, KvError};

/// HTTP key/value engine. Tables map to buckets on the remote service:
/// `GET/PUT/DELETE {base}/{table}/{hex(key)}`.
///
/// Any transport failure or unexpected status is surfaced as an error —
/// the tracer treats a lossy remote store as fatal.
#[derive(Debug)]
pub struct RemoteEngine {
    client: Client,
    base: String,
}

impl RemoteEngine {
    pub fn new(base: &str, _tables: &[String]) -> Result<Self, KvError> {
        let client = Client::builder()
            .build()
            .map_err(|e| KvError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, table: &str, key: &[u8]) -> String {
        format!("{}/{}/{}", self.base, table, hex::encode(key))
    }
}

impl KvEngine for RemoteEngine {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let resp = self
            .client
            .get(self.url(table, key))
            .send()
            .map_err(|e| KvError::Remote(e.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body = resp.bytes().map_err(|e| KvError::Remote(e.to_string()))?;
                Ok(Some(body.to_vec()))
            }
            s => Err(KvError::Remote(format!("GET {table}: status {s}"))),
        }
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let resp = self
            .client
            .put(self.url(table, key))
            .body(value.to_vec())
            .send()
            .map_err(|e| KvError::Remote(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(KvError::Remote(format!(
                "PUT {table}: status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    fn delete(&self, table: &str, key: &[u8]) -> Result<(), KvError> {
        let resp = self
            .client
            .delete(self.url(table, key))
            .send()
            .map_err(|e| KvError::Remote(e.to_string()))?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(KvError::Remote(format!(
                "DELETE {table}: status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

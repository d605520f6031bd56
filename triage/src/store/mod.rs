//! Persistent key-value store
//!
//! The store holds whole JSON values under string keys. There are no
//! partial-field transactions: callers that update one entry of a map value
//! read the whole value, modify it and write it back.

mod sqlite;

pub use sqlite::SqliteStore;

use serde_json::{Map, Value};
use std::sync::RwLock;

use crate::error::{Result, TriageError};

/// Keys of the persisted schema
pub mod keys {
    pub const CATEGORIES: &str = "categories";
    pub const API_KEY: &str = "apiKey";
    pub const USE_AI: &str = "useAI";
    pub const CACHED_CLASSIFICATIONS: &str = "cachedClassifications";
    pub const CACHE_VERSION: &str = "cacheVersion";
    pub const CACHE_EXPIRY: &str = "cacheExpiry";
}

/// A record loaded from or saved to the store
pub type Record = Map<String, Value>;

pub trait KeyValueStore: Send + Sync {
    /// Load the given keys, or every key when `keys` is `None`.
    /// Missing keys are simply absent from the returned record.
    fn load(&self, keys: Option<&[&str]>) -> Result<Record>;

    /// Upsert every key of `record`.
    fn save(&self, record: Record) -> Result<()>;
}

/// In-memory store, used by tests and the replay tool
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: Record) -> Self {
        Self {
            data: RwLock::new(record),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, keys: Option<&[&str]>) -> Result<Record> {
        let data = self
            .data
            .read()
            .map_err(|e| TriageError::Store(format!("Failed to lock store: {}", e)))?;

        Ok(match keys {
            None => data.clone(),
            Some(keys) => keys
                .iter()
                .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect(),
        })
    }

    fn save(&self, record: Record) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| TriageError::Store(format!("Failed to lock store: {}", e)))?;
        data.extend(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_scoped_load() {
        let store = MemoryStore::new();
        let mut record = Record::new();
        record.insert(keys::API_KEY.into(), json!("sk-test"));
        record.insert(keys::USE_AI.into(), json!(true));
        store.save(record).unwrap();

        let loaded = store.load(Some(&[keys::USE_AI, keys::CATEGORIES])).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(keys::USE_AI), Some(&json!(true)));

        let all = store.load(None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_memory_store_save_overwrites_key() {
        let store = MemoryStore::new();
        let mut first = Record::new();
        first.insert(keys::CACHE_VERSION.into(), json!(1));
        store.save(first).unwrap();

        let mut second = Record::new();
        second.insert(keys::CACHE_VERSION.into(), json!(2));
        store.save(second).unwrap();

        let loaded = store.load(Some(&[keys::CACHE_VERSION])).unwrap();
        assert_eq!(loaded.get(keys::CACHE_VERSION), Some(&json!(2)));
    }
}

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use super::{KeyValueStore, Record};
use crate::error::{Result, TriageError};

pub type DbPool = Pool<SqliteConnectionManager>;
type DbConnection = PooledConnection<SqliteConnectionManager>;

/// SQLite-backed key-value store. Values are JSON-encoded.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening triage store at {:?}", path);

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(4).build(manager).map_err(|e| {
            TriageError::Store(format!("Failed to create store pool: {}", e))
        })?;

        let store = Self { pool };
        store.initialize_schema(true)?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| {
            TriageError::Store(format!("Failed to create store pool: {}", e))
        })?;

        let store = Self { pool };
        store.initialize_schema(false)?;
        Ok(store)
    }

    fn connection(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .map_err(|e| TriageError::Store(format!("Failed to get store connection: {}", e)))
    }

    fn initialize_schema(&self, on_disk: bool) -> Result<()> {
        let conn = self.connection()?;

        if on_disk {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn get_value(conn: &DbConnection, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| serde_json::from_str(&s).map_err(TriageError::from))
            .transpose()
    }
}

impl KeyValueStore for SqliteStore {
    fn load(&self, keys: Option<&[&str]>) -> Result<Record> {
        let conn = self.connection()?;
        let mut record = Record::new();

        match keys {
            Some(keys) => {
                for key in keys {
                    if let Some(value) = Self::get_value(&conn, key)? {
                        record.insert(key.to_string(), value);
                    }
                }
            }
            None => {
                let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;

                for row in rows {
                    let (key, raw) = row?;
                    record.insert(key, serde_json::from_str(&raw)?);
                }
            }
        }

        Ok(record)
    }

    fn save(&self, record: Record) -> Result<()> {
        let mut conn = self.connection()?;
        let now = chrono::Utc::now().timestamp_millis();
        let tx = conn.transaction()?;

        for (key, value) in &record {
            tx.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, serde_json::to_string(value)?, now],
            )?;
        }

        tx.commit()?;
        debug!(keys = record.len(), "Saved store record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keys;
    use serde_json::json;

    #[test]
    fn test_save_and_load() {
        let store = SqliteStore::in_memory().unwrap();

        let mut record = Record::new();
        record.insert(keys::CACHE_VERSION.into(), json!(3));
        record.insert(
            keys::CACHED_CLASSIFICATIONS.into(),
            json!({ "thread-1": { "category": "Sales", "writtenAt": 10 } }),
        );
        store.save(record).unwrap();

        let loaded = store
            .load(Some(&[keys::CACHE_VERSION, keys::CACHE_EXPIRY]))
            .unwrap();
        assert_eq!(loaded.get(keys::CACHE_VERSION), Some(&json!(3)));
        assert!(!loaded.contains_key(keys::CACHE_EXPIRY));

        let all = store.load(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all[keys::CACHED_CLASSIFICATIONS]["thread-1"]["category"],
            json!("Sales")
        );
    }

    #[test]
    fn test_on_disk_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("triage.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            let mut record = Record::new();
            record.insert(keys::USE_AI.into(), json!(true));
            store.save(record).unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let loaded = reopened.load(Some(&[keys::USE_AI])).unwrap();
        assert_eq!(loaded.get(keys::USE_AI), Some(&json!(true)));
    }
}

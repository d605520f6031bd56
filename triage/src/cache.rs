//! Per-item classification cache with a global validity epoch
//!
//! Two tiers: an in-memory map answers every `get`, and the persistent
//! key-value store receives write-through updates so labels survive a reload.
//! The whole cache is valid only while the stored epoch has not expired and
//! its version is at least the expected one; otherwise it is dropped in one
//! step and a fresh epoch is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::category::Category;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::store::{keys, KeyValueStore, Record};

/// Expected cache version. Raise it whenever the rule set changes in a way
/// that makes previously stored categories wrong.
pub const CACHE_VERSION: u32 = 1;

/// Global validity stamp for the whole cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEpoch {
    pub version: u32,
    pub expiry: DateTime<Utc>,
}

impl CacheEpoch {
    pub fn is_valid(&self, expected_version: u32, now: DateTime<Utc>) -> bool {
        now < self.expiry && self.version >= expected_version
    }
}

/// The cached category of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRecord {
    #[serde(skip)]
    pub item_id: String,
    pub category: Category,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub written_at: DateTime<Utc>,
}

pub struct CategoryStore {
    backend: Arc<dyn KeyValueStore>,
    records: HashMap<String, ClassificationRecord>,
    epoch: Option<CacheEpoch>,
    expected_version: u32,
    ttl: chrono::Duration,
}

impl CategoryStore {
    /// Create a store over `backend`. Nothing is loaded until
    /// [`validate_epoch`](Self::validate_epoch) runs.
    pub fn new(backend: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            backend,
            records: HashMap::new(),
            epoch: None,
            expected_version: config.version,
            ttl: config.ttl(),
        }
    }

    /// Cached category, or `None` once the epoch has lapsed. Records of a
    /// lapsed epoch stay in memory until [`get_at`](Self::get_at) or a
    /// write runs the eviction.
    pub fn get(&self, item_id: &str) -> Option<Category> {
        self.record(item_id).map(|r| r.category)
    }

    pub fn record(&self, item_id: &str) -> Option<&ClassificationRecord> {
        if !self.epoch_valid_at(Utc::now()) {
            return None;
        }
        self.records.get(item_id)
    }

    /// Look up a category at `now`, clearing the whole cache first if the
    /// epoch is no longer valid.
    pub fn get_at(&mut self, item_id: &str, now: DateTime<Utc>) -> Option<Category> {
        if !self.epoch_valid_at(now) {
            info!("Cache epoch lapsed before read, clearing cache");
            self.clear_at(now);
            return None;
        }
        self.records.get(item_id).map(|r| r.category)
    }

    fn epoch_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.epoch
            .map(|e| e.is_valid(self.expected_version, now))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn epoch(&self) -> Option<CacheEpoch> {
        self.epoch
    }

    pub fn expected_version(&self) -> u32 {
        self.expected_version
    }

    pub fn set(&mut self, item_id: &str, category: Category) {
        self.set_at(item_id, category, Utc::now());
    }

    /// Upsert a record, running the eviction protocol first if the epoch
    /// is no longer valid at `now`.
    pub fn set_at(&mut self, item_id: &str, category: Category, now: DateTime<Utc>) {
        if !self.epoch_valid_at(now) {
            info!("Cache epoch lapsed before write, clearing cache");
            self.clear_at(now);
        }

        let record = ClassificationRecord {
            item_id: item_id.to_string(),
            category,
            written_at: now,
        };
        let encoded = serde_json::to_value(&record);
        self.records.insert(item_id.to_string(), record);

        let persisted = encoded.map_err(Into::into).and_then(|encoded| {
            self.update_persisted(|map| {
                map.insert(item_id.to_string(), encoded);
            })
        });
        if let Err(e) = persisted {
            warn!(item_id = %item_id, error = %e, "Failed to persist classification");
        }
    }

    pub fn delete(&mut self, item_id: &str) {
        self.records.remove(item_id);

        if let Err(e) = self.update_persisted(|map| {
            map.remove(item_id);
        }) {
            warn!(item_id = %item_id, error = %e, "Failed to persist cache deletion");
        }
    }

    pub fn clear(&mut self) {
        self.clear_at(Utc::now());
    }

    /// Drop every record and start a new epoch at the expected version.
    pub fn clear_at(&mut self, now: DateTime<Utc>) {
        let epoch = CacheEpoch {
            version: self.expected_version,
            expiry: now + self.ttl,
        };
        self.records.clear();
        self.epoch = Some(epoch);

        let mut record = Record::new();
        record.insert(keys::CACHED_CLASSIFICATIONS.into(), Value::Object(Map::new()));
        record.insert(keys::CACHE_VERSION.into(), json!(epoch.version));
        record.insert(keys::CACHE_EXPIRY.into(), json!(epoch.expiry.timestamp_millis()));

        match self.backend.save(record) {
            Ok(()) => info!(
                version = epoch.version,
                expiry = %epoch.expiry,
                "Cache cleared, new epoch written"
            ),
            Err(e) => warn!(error = %e, "Failed to persist new cache epoch"),
        }
    }

    /// Raise the expected version and clear, invalidating every copy of the
    /// cache that still carries the old version.
    pub fn bump_version(&mut self) {
        self.expected_version += 1;
        info!(version = self.expected_version, "Cache version bumped");
        self.clear();
    }

    pub fn validate_epoch(&mut self) -> bool {
        self.validate_epoch_at(Utc::now())
    }

    /// Check the stored epoch against the expected version and `now`.
    ///
    /// On success the persisted records are loaded and `true` is returned.
    /// Otherwise the cache is cleared, a new epoch written, and `false`
    /// returned. An unreadable store counts as invalid.
    pub fn validate_epoch_at(&mut self, now: DateTime<Utc>) -> bool {
        let record = match self.backend.load(Some(&[
            keys::CACHE_VERSION,
            keys::CACHE_EXPIRY,
            keys::CACHED_CLASSIFICATIONS,
        ])) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Failed to read cache epoch, starting uncached");
                self.clear_at(now);
                return false;
            }
        };

        let stored_version = record
            .get(keys::CACHE_VERSION)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        let stored_expiry = record
            .get(keys::CACHE_EXPIRY)
            .and_then(Value::as_i64)
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let epoch = match (stored_version, stored_expiry) {
            (Some(version), Some(expiry)) => CacheEpoch { version, expiry },
            _ => {
                info!("No cache epoch found, writing a fresh one");
                self.clear_at(now);
                return false;
            }
        };

        if !epoch.is_valid(self.expected_version, now) {
            info!(
                stored_version = epoch.version,
                expected_version = self.expected_version,
                expiry = %epoch.expiry,
                "Cache epoch invalid, clearing cache"
            );
            self.clear_at(now);
            return false;
        }

        self.records = record
            .get(keys::CACHED_CLASSIFICATIONS)
            .and_then(Value::as_object)
            .map(Self::decode_records)
            .unwrap_or_default();
        self.epoch = Some(epoch);

        debug!(records = self.records.len(), "Cache epoch valid");
        true
    }

    fn decode_records(map: &Map<String, Value>) -> HashMap<String, ClassificationRecord> {
        map.iter()
            .filter_map(|(id, value)| {
                match serde_json::from_value::<ClassificationRecord>(value.clone()) {
                    Ok(mut record) => {
                        record.item_id = id.clone();
                        Some((id.clone(), record))
                    }
                    Err(e) => {
                        warn!(item_id = %id, error = %e, "Dropping unreadable cache entry");
                        None
                    }
                }
            })
            .collect()
    }

    /// Read-modify-write of the persisted record map.
    fn update_persisted<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut map = self
            .backend
            .load(Some(&[keys::CACHED_CLASSIFICATIONS]))?
            .remove(keys::CACHED_CLASSIFICATIONS)
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();

        apply(&mut map);

        let mut record = Record::new();
        record.insert(keys::CACHED_CLASSIFICATIONS.into(), Value::Object(map));
        self.backend.save(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriageError;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn config(version: u32) -> CacheConfig {
        CacheConfig {
            ttl_days: 7,
            version,
        }
    }

    fn seeded_backend(version: u32, expiry: DateTime<Utc>) -> Arc<MemoryStore> {
        let mut record = Record::new();
        record.insert(keys::CACHE_VERSION.into(), json!(version));
        record.insert(keys::CACHE_EXPIRY.into(), json!(expiry.timestamp_millis()));
        record.insert(
            keys::CACHED_CLASSIFICATIONS.into(),
            json!({
                "a": { "category": "Sales", "writtenAt": expiry.timestamp_millis() - 1000 },
                "b": { "category": "Spam", "writtenAt": expiry.timestamp_millis() - 1000 },
            }),
        );
        Arc::new(MemoryStore::with_record(record))
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn load(&self, _keys: Option<&[&str]>) -> Result<Record> {
            Err(TriageError::Store("disk on fire".into()))
        }

        fn save(&self, _record: Record) -> Result<()> {
            Err(TriageError::Store("disk on fire".into()))
        }
    }

    #[test]
    fn test_valid_epoch_loads_records() {
        let now = Utc::now();
        let backend = seeded_backend(1, now + Duration::days(2));
        let mut store = CategoryStore::new(backend, &config(1));

        assert!(store.validate_epoch_at(now));
        assert_eq!(store.get("a"), Some(Category::Sales));
        assert_eq!(store.get("b"), Some(Category::Spam));
        assert_eq!(store.record("a").map(|r| r.item_id.as_str()), Some("a"));
    }

    #[test]
    fn test_expired_epoch_clears() {
        let now = Utc::now();
        let backend = seeded_backend(1, now - Duration::seconds(1));
        let mut store = CategoryStore::new(backend.clone(), &config(1));

        assert!(!store.validate_epoch_at(now));
        assert!(store.is_empty());

        let persisted = backend.load(None).unwrap();
        assert_eq!(persisted[keys::CACHED_CLASSIFICATIONS], json!({}));
        assert_eq!(
            persisted[keys::CACHE_EXPIRY],
            json!((now + Duration::days(7)).timestamp_millis())
        );
    }

    #[test]
    fn test_version_bump_clears_unexpired_cache() {
        let now = Utc::now();
        let backend = seeded_backend(1, now + Duration::days(2));
        let mut store = CategoryStore::new(backend.clone(), &config(2));

        assert!(!store.validate_epoch_at(now));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.epoch().map(|e| e.version), Some(2));
        assert_eq!(backend.load(None).unwrap()[keys::CACHE_VERSION], json!(2));
    }

    #[test]
    fn test_newer_stored_version_is_valid() {
        let now = Utc::now();
        let backend = seeded_backend(3, now + Duration::days(2));
        let mut store = CategoryStore::new(backend, &config(2));
        assert!(store.validate_epoch_at(now));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_missing_epoch_is_fresh_install() {
        let backend = Arc::new(MemoryStore::new());
        let mut store = CategoryStore::new(backend.clone(), &config(1));

        assert!(!store.validate_epoch_at(Utc::now()));
        let persisted = backend.load(None).unwrap();
        assert_eq!(persisted[keys::CACHE_VERSION], json!(1));
        assert!(persisted.contains_key(keys::CACHE_EXPIRY));
    }

    #[test]
    fn test_set_then_get_until_delete() {
        let backend = Arc::new(MemoryStore::new());
        let mut store = CategoryStore::new(backend.clone(), &config(1));
        store.validate_epoch();

        store.set("x", Category::JobOffers);
        assert_eq!(store.get("x"), Some(Category::JobOffers));
        store.set("x", Category::Networking);
        assert_eq!(store.get("x"), Some(Category::Networking));

        let persisted = backend.load(None).unwrap();
        assert_eq!(
            persisted[keys::CACHED_CLASSIFICATIONS]["x"]["category"],
            json!("Networking")
        );

        store.delete("x");
        assert_eq!(store.get("x"), None);
        let persisted = backend.load(None).unwrap();
        assert_eq!(persisted[keys::CACHED_CLASSIFICATIONS], json!({}));
    }

    #[test]
    fn test_set_after_expiry_evicts_first() {
        let now = Utc::now();
        let backend = seeded_backend(1, now + Duration::days(1));
        let mut store = CategoryStore::new(backend, &config(1));
        assert!(store.validate_epoch_at(now));

        let later = now + Duration::days(2);
        store.set_at("c", Category::Spam, later);

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("c"), Some(Category::Spam));
        assert_eq!(store.epoch().map(|e| e.expiry), Some(later + Duration::days(7)));
    }

    #[test]
    fn test_lapsed_epoch_hides_records() {
        let now = Utc::now();
        let backend = seeded_backend(1, now - Duration::minutes(1));
        let mut store = CategoryStore::new(backend, &config(1));

        // Valid when the session started, expired by the time of the read.
        assert!(store.validate_epoch_at(now - Duration::minutes(2)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), None);
        assert!(store.record("b").is_none());
    }

    #[test]
    fn test_get_after_expiry_clears() {
        let now = Utc::now();
        let backend = seeded_backend(1, now + Duration::hours(1));
        let mut store = CategoryStore::new(backend.clone(), &config(1));
        assert!(store.validate_epoch_at(now));
        assert_eq!(store.get_at("a", now), Some(Category::Sales));

        let later = now + Duration::hours(2);
        assert_eq!(store.get_at("a", later), None);
        assert!(store.is_empty());
        assert_eq!(store.epoch().map(|e| e.expiry), Some(later + Duration::days(7)));

        let persisted = backend.load(None).unwrap();
        assert_eq!(persisted[keys::CACHED_CLASSIFICATIONS], json!({}));
    }

    #[test]
    fn test_written_entry_decodes_back() {
        let backend = Arc::new(MemoryStore::new());
        let mut store = CategoryStore::new(backend.clone(), &config(1));
        store.validate_epoch();

        let now = Utc::now();
        store.set_at("x", Category::Networking, now);

        let persisted = backend.load(None).unwrap();
        let entry = &persisted[keys::CACHED_CLASSIFICATIONS]["x"];
        assert_eq!(entry["writtenAt"], json!(now.timestamp_millis()));
        assert!(entry.get("itemId").is_none());

        let mut reloaded = CategoryStore::new(backend, &config(1));
        assert!(reloaded.validate_epoch());
        let record = reloaded.record("x").unwrap();
        assert_eq!(record.category, Category::Networking);
        assert_eq!(record.written_at.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_persisted_write_preserves_foreign_entries() {
        let now = Utc::now();
        let backend = seeded_backend(1, now + Duration::days(1));
        let mut store = CategoryStore::new(backend.clone(), &config(1));
        assert!(store.validate_epoch_at(now));

        // Another session wrote an entry after this one loaded.
        let mut map = backend.load(None).unwrap()[keys::CACHED_CLASSIFICATIONS].clone();
        map["z"] = json!({ "category": "Other", "writtenAt": 0 });
        let mut record = Record::new();
        record.insert(keys::CACHED_CLASSIFICATIONS.into(), map);
        backend.save(record).unwrap();

        store.set_at("a", Category::JobOffers, now);

        let persisted = backend.load(None).unwrap();
        assert_eq!(
            persisted[keys::CACHED_CLASSIFICATIONS]["z"]["category"],
            json!("Other")
        );
        assert_eq!(
            persisted[keys::CACHED_CLASSIFICATIONS]["a"]["category"],
            json!("JobOffers")
        );
    }

    #[test]
    fn test_bump_version_clears() {
        let backend = Arc::new(MemoryStore::new());
        let mut store = CategoryStore::new(backend, &config(1));
        store.validate_epoch();
        store.set("x", Category::Sales);

        store.bump_version();
        assert_eq!(store.expected_version(), 2);
        assert!(store.is_empty());
        assert_eq!(store.epoch().map(|e| e.version), Some(2));
    }

    #[test]
    fn test_broken_store_degrades_to_memory() {
        let mut store = CategoryStore::new(Arc::new(BrokenStore), &config(1));

        assert!(!store.validate_epoch());
        store.set("x", Category::Spam);
        assert_eq!(store.get("x"), Some(Category::Spam));
        store.delete("x");
        assert_eq!(store.get("x"), None);
    }

    #[test]
    fn test_unreadable_entries_are_dropped() {
        let now = Utc::now();
        let mut record = Record::new();
        record.insert(keys::CACHE_VERSION.into(), json!(1));
        record.insert(
            keys::CACHE_EXPIRY.into(),
            json!((now + Duration::days(1)).timestamp_millis()),
        );
        record.insert(
            keys::CACHED_CLASSIFICATIONS.into(),
            json!({
                "ok": { "category": "Spam", "writtenAt": 1 },
                "bad": { "category": "Gossip", "writtenAt": 1 },
            }),
        );
        let mut store =
            CategoryStore::new(Arc::new(MemoryStore::with_record(record)), &config(1));

        assert!(store.validate_epoch_at(now));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("ok"), Some(Category::Spam));
    }
}

//! User settings persisted in the key-value store
//!
//! Written by the settings surface, read once per session at bootstrap and
//! again whenever the pipeline is told to reload.

use serde_json::{json, Value};
use tracing::warn;

use crate::category::Category;
use crate::error::Result;
use crate::store::{keys, KeyValueStore, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Categories offered as filter buttons
    pub categories: Vec<Category>,
    /// Credential for the remote classifier
    pub api_key: String,
    /// Explicit opt-in for the remote classifier
    pub use_ai: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            categories: Category::PRIORITY.to_vec(),
            api_key: String::new(),
            use_ai: false,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults for missing or malformed keys.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let record = store.load(Some(&[keys::CATEGORIES, keys::API_KEY, keys::USE_AI]))?;
        let mut settings = Self::default();

        match record.get(keys::CATEGORIES) {
            Some(Value::Array(names)) => {
                settings.categories = names
                    .iter()
                    .filter_map(|v| {
                        let parsed = v.as_str().and_then(Category::parse);
                        if parsed.is_none() {
                            warn!(value = %v, "Ignoring unknown category in settings");
                        }
                        parsed
                    })
                    .collect();
            }
            Some(other) => warn!(value = %other, "Malformed categories setting"),
            None => {}
        }

        match record.get(keys::API_KEY) {
            Some(Value::String(key)) => settings.api_key = key.trim().to_string(),
            Some(_) => warn!("Malformed apiKey setting"),
            None => {}
        }

        match record.get(keys::USE_AI) {
            Some(Value::Bool(flag)) => settings.use_ai = *flag,
            Some(other) => warn!(value = %other, "Malformed useAI setting"),
            None => {}
        }

        Ok(settings)
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let categories: Vec<&str> = self.categories.iter().map(|c| c.as_str()).collect();

        let mut record = Record::new();
        record.insert(keys::CATEGORIES.into(), json!(categories));
        record.insert(keys::API_KEY.into(), json!(self.api_key));
        record.insert(keys::USE_AI.into(), json!(self.use_ai));
        store.save(record)
    }

    /// The remote classifier runs only with a credential and an explicit opt-in.
    pub fn remote_enabled(&self) -> bool {
        self.use_ai && !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_defaults_when_store_empty() {
        let store = MemoryStore::new();
        let settings = Settings::load(&store).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(!settings.remote_enabled());
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        let settings = Settings {
            categories: vec![Category::Sales, Category::Spam],
            api_key: "sk-123".into(),
            use_ai: true,
        };
        settings.save(&store).unwrap();

        let loaded = Settings::load(&store).unwrap();
        assert_eq!(loaded, settings);
        assert!(loaded.remote_enabled());
    }

    #[test]
    fn test_remote_requires_key_and_opt_in() {
        let key_only = Settings {
            api_key: "sk-123".into(),
            ..Settings::default()
        };
        assert!(!key_only.remote_enabled());

        let opt_in_only = Settings {
            use_ai: true,
            ..Settings::default()
        };
        assert!(!opt_in_only.remote_enabled());
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let mut record = Record::new();
        record.insert(keys::CATEGORIES.into(), json!(["Sales", "Gossip"]));
        record.insert(keys::USE_AI.into(), json!("yes"));
        let store = MemoryStore::with_record(record);

        let settings = Settings::load(&store).unwrap();
        assert_eq!(settings.categories, vec![Category::Sales]);
        assert!(!settings.use_ai);
    }
}

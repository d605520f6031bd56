//! Adapters at the edge of the pipeline
//!
//! [`Document`] reads the externally rendered conversation list and
//! [`Presenter`] draws or removes labels. Both are implemented by the host;
//! the in-memory versions here back the tests and the replay tool.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::category::Category;

/// Text extracted from one rendered item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
}

/// Semantic change signals emitted by the document adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "itemId", rename_all = "camelCase")]
pub enum DocumentEvent {
    ItemAdded(String),
    ItemChanged(String),
    ItemRemoved(String),
    UnreadIndicatorAppeared(String),
    UnreadIndicatorRemoved(String),
}

impl DocumentEvent {
    pub fn item_id(&self) -> &str {
        match self {
            Self::ItemAdded(id)
            | Self::ItemChanged(id)
            | Self::ItemRemoved(id)
            | Self::UnreadIndicatorAppeared(id)
            | Self::UnreadIndicatorRemoved(id) => id,
        }
    }
}

/// Read access to the rendered conversation list.
///
/// `None` means the element could not be found; the pipeline skips the
/// item for this cycle.
pub trait Document {
    /// Identifiers of every item currently shown
    fn item_ids(&self) -> Vec<String>;

    fn read_text(&self, item_id: &str) -> Option<ItemContent>;

    fn read_unread_flag(&self, item_id: &str) -> Option<bool>;
}

/// Write access to labels
pub trait Presenter {
    fn on_classified(&mut self, item_id: &str, category: Category);

    fn on_evicted(&mut self, item_id: &str);
}

#[derive(Debug, Clone, Default)]
struct MemoryItem {
    content: ItemContent,
    unread: bool,
}

/// Shared in-memory document. Clones share the same items, so a test can
/// keep one handle to mutate while the pipeline reads through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    items: Arc<RwLock<BTreeMap<String, MemoryItem>>>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item_id: &str, content: ItemContent, unread: bool) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item_id.to_string(), MemoryItem { content, unread });
        }
    }

    pub fn set_text(&self, item_id: &str, text: &str) {
        if let Ok(mut items) = self.items.write() {
            if let Some(item) = items.get_mut(item_id) {
                item.content.text = text.to_string();
            }
        }
    }

    pub fn set_unread(&self, item_id: &str, unread: bool) {
        if let Ok(mut items) = self.items.write() {
            if let Some(item) = items.get_mut(item_id) {
                item.unread = unread;
            }
        }
    }

    pub fn remove(&self, item_id: &str) {
        if let Ok(mut items) = self.items.write() {
            items.remove(item_id);
        }
    }
}

impl Document for MemoryDocument {
    fn item_ids(&self) -> Vec<String> {
        self.items
            .read()
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read_text(&self, item_id: &str) -> Option<ItemContent> {
        self.items
            .read()
            .ok()
            .and_then(|items| items.get(item_id).map(|i| i.content.clone()))
    }

    fn read_unread_flag(&self, item_id: &str) -> Option<bool> {
        self.items
            .read()
            .ok()
            .and_then(|items| items.get(item_id).map(|i| i.unread))
    }
}

/// Presenter that remembers the labels it was asked to draw
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    labels: HashMap<String, Category>,
    classified: Vec<(String, Category)>,
    evicted: Vec<String>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self, item_id: &str) -> Option<Category> {
        self.labels.get(item_id).copied()
    }

    pub fn labels(&self) -> &HashMap<String, Category> {
        &self.labels
    }

    /// Every `on_classified` call, in order
    pub fn classified(&self) -> &[(String, Category)] {
        &self.classified
    }

    /// Every `on_evicted` call, in order
    pub fn evicted(&self) -> &[String] {
        &self.evicted
    }
}

impl Presenter for RecordingPresenter {
    fn on_classified(&mut self, item_id: &str, category: Category) {
        self.labels.insert(item_id.to_string(), category);
        self.classified.push((item_id.to_string(), category));
    }

    fn on_evicted(&mut self, item_id: &str) {
        self.labels.remove(item_id);
        self.evicted.push(item_id.to_string());
    }
}

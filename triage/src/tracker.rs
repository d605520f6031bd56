//! Content change detection
//!
//! Remembers a fingerprint of the text each item had when it was last sent
//! for classification. Empty text means the snippet has not rendered yet and
//! never counts as a change.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

type Fingerprint = [u8; 32];

#[derive(Debug, Default)]
pub struct ChangeTracker {
    fingerprints: HashMap<String, Fingerprint>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint(text: &str) -> Fingerprint {
        let digest = Sha256::digest(text.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// True when `current_text` is non-empty and differs from the text
    /// committed for this item. An unknown item counts as previously empty.
    pub fn has_meaningful_change(&self, item_id: &str, current_text: &str) -> bool {
        if current_text.is_empty() {
            return false;
        }

        match self.fingerprints.get(item_id) {
            Some(previous) => *previous != Self::fingerprint(current_text),
            None => true,
        }
    }

    /// Record `current_text` as classified. Call once, right before dispatch.
    pub fn commit(&mut self, item_id: &str, current_text: &str) {
        self.fingerprints
            .insert(item_id.to_string(), Self::fingerprint(current_text));
    }

    pub fn is_tracked(&self, item_id: &str) -> bool {
        self.fingerprints.contains_key(item_id)
    }

    pub fn forget(&mut self, item_id: &str) {
        self.fingerprints.remove(item_id);
    }

    pub fn clear(&mut self) {
        self.fingerprints.clear();
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

//! Resource metadata bags (project `commonInstanceMetadata` or instance
//! `metadata`).

use std::collections::HashMap;

use crate::compute::wire;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

/// Ordered map of metadata entries keyed by name.
///
/// Lookup goes through a key → position index; iteration follows insertion
/// order. The server fingerprint is carried along so a write-back can be
/// rejected if someone else changed the bag in between.
#[derive(Debug, Clone, Default)]
pub struct MetadataBag {
    entries: Vec<MetadataEntry>,
    index: HashMap<String, usize>,
    pub fingerprint: Option<String>,
}

impl MetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .map(|&i| self.entries[i].value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Replace the value of `key` in place, or append a new entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].value = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push(MetadataEntry { key, value });
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn from_wire(metadata: wire::Metadata) -> Self {
        let mut bag = MetadataBag {
            fingerprint: metadata.fingerprint,
            ..Default::default()
        };
        for item in metadata.items {
            // First occurrence wins; the API never sends duplicates.
            if bag.contains_key(&item.key) {
                tracing::debug!(key = %item.key, "dropping duplicate metadata key");
                continue;
            }
            bag.insert(item.key, item.value.unwrap_or_default());
        }
        bag
    }

    pub(crate) fn to_wire(&self) -> wire::Metadata {
        wire::Metadata {
            fingerprint: self.fingerprint.clone(),
            items: self
                .entries
                .iter()
                .map(|e| wire::MetadataItem {
                    key: e.key.clone(),
                    value: Some(e.value.clone()),
                })
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = MetadataBag::new();
        for (k, v) in iter {
            bag.insert(k, v);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut bag: MetadataBag = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        bag.insert("b", "20");
        let keys: Vec<_> = bag.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(bag.get("b"), Some("20"));
        assert_eq!(bag.len(), 3);
    }

    #[test]
    fn insert_appends_new_keys() {
        let mut bag = MetadataBag::new();
        bag.insert("startup-script", "echo hi");
        bag.insert("sshKeys", "alice:ssh-ed25519 AAAA");
        assert_eq!(bag.iter().last().unwrap().key, "sshKeys");
    }

    #[test]
    fn wire_duplicates_keep_first() {
        let wire = wire::Metadata {
            fingerprint: Some("abc=".into()),
            items: vec![
                wire::MetadataItem {
                    key: "k".into(),
                    value: Some("first".into()),
                },
                wire::MetadataItem {
                    key: "k".into(),
                    value: Some("second".into()),
                },
                wire::MetadataItem {
                    key: "empty".into(),
                    value: None,
                },
            ],
        };
        let bag = MetadataBag::from_wire(wire);
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get("k"), Some("first"));
        assert_eq!(bag.get("empty"), Some(""));
        assert_eq!(bag.fingerprint.as_deref(), Some("abc="));
    }

    #[test]
    fn to_wire_preserves_order_and_fingerprint() {
        let mut bag: MetadataBag = [("x", "1"), ("y", "2")].into_iter().collect();
        bag.fingerprint = Some("fp".into());
        let wire = bag.to_wire();
        assert_eq!(wire.fingerprint.as_deref(), Some("fp"));
        assert_eq!(wire.items[0].key, "x");
        assert_eq!(wire.items[1].value.as_deref(), Some("2"));
    }
}

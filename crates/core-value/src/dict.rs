//! The Dictionary: record keys kept next to, not inside, a Value.
//!
//! Keys are not data. Two values whose schemas and data agree are equal even
//! if one calls its slots `{x, y, z}` and the other `{r, g, b}`; the
//! dictionary is ignored by equality and hashing. It exists only to resolve
//! names to slot indices when indexing or mutating by key.
//!
//! Structure mirrors the value: records hold an ordered name→slot map (empty
//! for unnamed records) plus one child dictionary slot per record entry;
//! lists carry their element's dictionary; ground values carry none.

use std::sync::Arc;

use indexmap::IndexMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    /// Name → slot index, in slot order. Empty for unnamed records.
    names: IndexMap<String, usize>,
    /// One entry per record slot; `None` where the child needs no dictionary.
    children: Vec<Option<Arc<Dictionary>>>,
}

impl Dictionary {
    pub(crate) fn new(
        names: IndexMap<String, usize>,
        children: Vec<Option<Arc<Dictionary>>>,
    ) -> Self {
        debug_assert!(names.is_empty() || names.len() == children.len());
        Self { names, children }
    }

    /// Whether this record's entries are unnamed.
    pub fn is_unnamed(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolves a key to its slot index.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// The known keys, in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// The key of a given slot, if the record is named.
    pub fn key_at(&self, slot: usize) -> Option<&str> {
        self.names.get_index(slot).map(|(key, _)| key.as_str())
    }

    pub fn child(&self, slot: usize) -> Option<&Arc<Dictionary>> {
        self.children.get(slot).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_lookup_preserves_slot_order() {
        let mut names = IndexMap::new();
        names.insert("width".to_string(), 0);
        names.insert("height".to_string(), 1);
        let dict = Dictionary::new(names, vec![None, None]);
        assert_eq!(dict.get("width"), Some(0));
        assert_eq!(dict.get("height"), Some(1));
        assert_eq!(dict.get("depth"), None);
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["width", "height"]);
        assert_eq!(dict.key_at(1), Some("height"));
        assert!(!dict.is_unnamed());
    }

    #[test]
    fn unnamed_record_has_children_but_no_names() {
        let dict = Dictionary::new(IndexMap::new(), vec![None, None, None]);
        assert!(dict.is_unnamed());
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.key_at(0), None);
    }
}

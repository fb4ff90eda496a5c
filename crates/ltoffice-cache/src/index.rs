use crate::name::{allocate_cache_file_name, parse_cache_file_name};
use crate::util::LOG_TARGET;
use std::collections::{BTreeMap, HashSet};

/// Result of [`CacheIndex::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub name: String,
    /// True if the index was mutated and needs to be persisted again.
    pub created: bool,
}

/// In-memory mapping from document identity to cache file name.
///
/// Values are unique: no two identities map to the same cache file at the same time.
/// Cloning yields a fully independent snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheIndex {
    entries: BTreeMap<String, String>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from decoded entries, dropping any entry whose name is not a cache
    /// file name or is already used by another identity.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut index = Self::new();
        let mut seen = HashSet::new();
        for (doc_id, name) in entries {
            if parse_cache_file_name(&name).is_none() {
                tracing::warn!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    name = %name,
                    "dropping index entry with invalid cache file name"
                );
                continue;
            }
            if !seen.insert(name.clone()) {
                tracing::warn!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    name = %name,
                    "dropping index entry with duplicate cache file name"
                );
                continue;
            }
            index.entries.insert(doc_id, name);
        }
        index
    }

    pub fn get(&self, doc_id: &str) -> Option<&str> {
        self.entries.get(doc_id).map(String::as_str)
    }

    /// Looks up `doc_id`, allocating a fresh cache file name when it is missing and `create`
    /// is set.
    pub fn get_or_create(&mut self, doc_id: &str, create: bool) -> Option<Allocation> {
        if let Some(name) = self.entries.get(doc_id) {
            return Some(Allocation {
                name: name.clone(),
                created: false,
            });
        }
        if !create {
            return None;
        }

        let name = allocate_cache_file_name(self.entries.values().map(String::as_str));
        self.entries.insert(doc_id.to_string(), name.clone());
        Some(Allocation {
            name,
            created: true,
        })
    }

    pub fn remove(&mut self, doc_id: &str) -> Option<String> {
        self.entries.remove(doc_id)
    }

    pub fn snapshot(&self) -> CacheIndex {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.values().any(|value| value == name)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(doc_id, name)| (doc_id.as_str(), name.as_str()))
    }

    pub(crate) fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_without_create_does_not_mutate() {
        let mut index = CacheIndex::new();
        assert_eq!(index.get_or_create("/docs/a.odt", false), None);
        assert!(index.is_empty());
    }

    #[test]
    fn existing_mapping_is_returned_unchanged() {
        let mut index = CacheIndex::new();
        let first = index.get_or_create("/docs/a.odt", true).unwrap();
        assert!(first.created);

        let again = index.get_or_create("/docs/a.odt", true).unwrap();
        assert_eq!(again.name, first.name);
        assert!(!again.created);

        let lookup = index.get_or_create("/docs/a.odt", false).unwrap();
        assert_eq!(lookup.name, first.name);
        assert!(!lookup.created);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn distinct_documents_get_distinct_names() {
        let mut index = CacheIndex::new();
        let mut names = HashSet::new();
        for i in 0..50 {
            let alloc = index.get_or_create(&format!("/docs/{i}.odt"), true).unwrap();
            assert!(names.insert(alloc.name));
        }
        assert_eq!(index.len(), 50);
        assert!(names.contains("LtCache1.lcz"));
        assert!(names.contains("LtCache50.lcz"));
    }

    #[test]
    fn removed_name_is_reused_but_live_names_are_not() {
        let mut index = CacheIndex::new();
        index.get_or_create("/docs/a.odt", true).unwrap();
        index.get_or_create("/docs/b.odt", true).unwrap();
        index.get_or_create("/docs/c.odt", true).unwrap();

        assert_eq!(index.remove("/docs/b.odt").as_deref(), Some("LtCache2.lcz"));
        assert_eq!(index.remove("/docs/b.odt"), None);

        let d = index.get_or_create("/docs/d.odt", true).unwrap();
        assert_eq!(d.name, "LtCache2.lcz");
        let e = index.get_or_create("/docs/e.odt", true).unwrap();
        assert_eq!(e.name, "LtCache4.lcz");
    }

    #[test]
    fn snapshot_is_independent() {
        let mut index = CacheIndex::new();
        index.get_or_create("/docs/a.odt", true).unwrap();

        let mut snapshot = index.snapshot();
        snapshot.remove("/docs/a.odt");
        index.get_or_create("/docs/b.odt", true).unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(index.len(), 2);
        assert!(index.contains_name("LtCache1.lcz"));
        assert!(!snapshot.contains_name("LtCache1.lcz"));
    }

    #[test]
    fn from_entries_drops_invalid_and_duplicate_names() {
        let index = CacheIndex::from_entries([
            ("/docs/a.odt".to_string(), "LtCache1.lcz".to_string()),
            ("/docs/b.odt".to_string(), "LtCache1.lcz".to_string()),
            ("/docs/c.odt".to_string(), "../../etc/passwd".to_string()),
            ("/docs/d.odt".to_string(), "LtCache3.lcz".to_string()),
        ]);

        let entries: Vec<_> = index.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("/docs/a.odt", "LtCache1.lcz"),
                ("/docs/d.odt", "LtCache3.lcz"),
            ]
        );
        assert_eq!(index.doc_ids().count(), 2);
    }
}

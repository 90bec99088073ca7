use super::{IndexError, IndexKind};
use crate::query::predicates::{self, Predicate};
use crate::table::file_id_from_file_name;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Source of exact record key → file membership
pub trait RecordKeyIndexProvider {
    fn is_index_available(&self) -> bool;

    /// Keys pinned by equality/IN predicates on the record key field
    ///
    /// None when the predicates don't constrain the key, in which case the
    /// index can't help this query.
    fn extract_exact_match_keys(
        &self,
        predicates: &[Predicate],
        record_key_field: &str,
    ) -> Option<BTreeSet<String>> {
        predicates::exact_match_keys(predicates, record_key_field)
    }

    /// Names among `all_files` that may hold any of `keys`
    fn get_candidate_files(
        &self,
        all_files: &[String],
        keys: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, IndexError>;

    /// Names among `all_files` the index has entries for
    fn indexed_files(&self, all_files: &[String]) -> Result<BTreeSet<String>, IndexError>;

    /// Drop anything cached from previous lookups
    fn invalidate_caches(&mut self) {}
}

/// Record key index for O(1) key → file group lookups
///
/// Maintains the forward mapping plus a reverse file group → keys mapping,
/// so coverage questions ("does the index know this file at all?") are
/// answered without scanning every key.
#[derive(Debug, Clone)]
pub struct InMemoryRecordIndex {
    /// Main index: record key → file group id
    key_to_file: HashMap<String, String>,

    /// Reverse index: file group id → keys
    file_to_keys: HashMap<String, HashSet<String>>,

    available: bool,
}

impl InMemoryRecordIndex {
    pub fn new() -> Self {
        Self {
            key_to_file: HashMap::new(),
            file_to_keys: HashMap::new(),
            available: true,
        }
    }

    /// Insert a single key → file group mapping, moving the key if it was elsewhere
    pub fn insert(&mut self, key: impl Into<String>, file_id: impl Into<String>) {
        let key = key.into();
        let file_id = file_id.into();

        if let Some(previous) = self.key_to_file.get(&key) {
            if let Some(keys) = self.file_to_keys.get_mut(previous) {
                keys.remove(&key);
            }
        }

        self.file_to_keys
            .entry(file_id.clone())
            .or_default()
            .insert(key.clone());
        self.key_to_file.insert(key, file_id);
    }

    /// Batch insert of every key written to one file group
    pub fn insert_batch<I, S>(&mut self, file_id: &str, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self.insert(key, file_id);
        }
    }

    /// Lookup a key - O(1) operation
    pub fn get(&self, key: &str) -> Option<&str> {
        self.key_to_file.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let file_id = self.key_to_file.remove(key)?;
        if let Some(keys) = self.file_to_keys.get_mut(&file_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.file_to_keys.remove(&file_id);
            }
        }
        Some(file_id)
    }

    /// Whether the index holds any key for this file group
    pub fn covers_file_id(&self, file_id: &str) -> bool {
        self.file_to_keys
            .get(file_id)
            .map_or(false, |keys| !keys.is_empty())
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn len(&self) -> usize {
        self.key_to_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_file.is_empty()
    }

    /// Number of file groups tracked
    pub fn file_group_count(&self) -> usize {
        self.file_to_keys.len()
    }

    fn ensure_available(&self) -> Result<(), IndexError> {
        if self.available {
            Ok(())
        } else {
            Err(IndexError::Unavailable(IndexKind::RecordKey))
        }
    }
}

impl Default for InMemoryRecordIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordKeyIndexProvider for InMemoryRecordIndex {
    fn is_index_available(&self) -> bool {
        self.available
    }

    fn get_candidate_files(
        &self,
        all_files: &[String],
        keys: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, IndexError> {
        self.ensure_available()?;

        let file_ids: HashSet<&str> = keys.iter().filter_map(|key| self.get(key)).collect();
        Ok(all_files
            .iter()
            .filter(|name| file_id_from_file_name(name).map_or(false, |id| file_ids.contains(id)))
            .cloned()
            .collect())
    }

    fn indexed_files(&self, all_files: &[String]) -> Result<BTreeSet<String>, IndexError> {
        self.ensure_available()?;

        Ok(all_files
            .iter()
            .filter(|name| file_id_from_file_name(name).map_or(false, |id| self.covers_file_id(id)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_basic_operations() {
        let mut index = InMemoryRecordIndex::new();
        assert!(index.is_empty());

        index.insert("k1", "f1");
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("k1"), Some("f1"));
        assert_eq!(index.get("k2"), None);
        assert!(index.covers_file_id("f1"));
    }

    #[test]
    fn test_key_moves_between_file_groups() {
        let mut index = InMemoryRecordIndex::new();
        index.insert("k1", "f1");
        index.insert("k1", "f2");

        assert_eq!(index.get("k1"), Some("f2"));
        assert!(!index.covers_file_id("f1"));
        assert!(index.covers_file_id("f2"));
    }

    #[test]
    fn test_remove() {
        let mut index = InMemoryRecordIndex::new();
        index.insert_batch("f1", ["k1", "k2"]);
        assert_eq!(index.file_group_count(), 1);

        assert_eq!(index.remove("k1"), Some("f1".to_string()));
        assert!(index.covers_file_id("f1"));
        assert_eq!(index.remove("k2"), Some("f1".to_string()));
        assert!(!index.covers_file_id("f1"));
        assert_eq!(index.file_group_count(), 0);
        assert_eq!(index.remove("k2"), None);
    }

    #[test]
    fn test_candidate_files_match_base_and_log_names() {
        let mut index = InMemoryRecordIndex::new();
        index.insert_batch("f1", ["k1"]);
        index.insert_batch("f2", ["k2"]);

        let all = files(&[
            "f1_0-1-1_001.parquet",
            ".f1_001.log.1_0-1-1",
            "f2_0-1-1_001.parquet",
            "f3_0-1-1_002.parquet",
        ]);

        let candidates = index.get_candidate_files(&all, &keys(&["k1"])).unwrap();
        assert_eq!(candidates, keys(&[".f1_001.log.1_0-1-1", "f1_0-1-1_001.parquet"]));

        let indexed = index.indexed_files(&all).unwrap();
        assert_eq!(indexed.len(), 3);
        assert!(!indexed.contains("f3_0-1-1_002.parquet"));
    }

    #[test]
    fn test_unknown_keys_match_nothing() {
        let mut index = InMemoryRecordIndex::new();
        index.insert("k1", "f1");
        let all = files(&["f1_0-1-1_001.parquet"]);
        assert!(index.get_candidate_files(&all, &keys(&["nope"])).unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_index_errors() {
        let mut index = InMemoryRecordIndex::new();
        index.set_available(false);
        let err = index.indexed_files(&[]).unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(IndexKind::RecordKey)));
    }

    #[test]
    fn test_default_key_extraction() {
        let index = InMemoryRecordIndex::new();
        let filters = vec![Predicate::eq("uuid", "k1")];
        assert_eq!(index.extract_exact_match_keys(&filters, "uuid"), Some(keys(&["k1"])));
        assert_eq!(index.extract_exact_match_keys(&filters, "other"), None);
    }
}

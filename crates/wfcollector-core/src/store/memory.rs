//! In-memory [`ResultStore`] implementation for testing.
//!
//! Uses a `HashMap` per collection behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use globset::Glob;

use crate::models::{Collection, ResultDocument};

use super::ResultStore;

type Documents = HashMap<String, Vec<ResultDocument>>;

/// In-memory store for tests.
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, Documents>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of documents in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        let guard = self.collections.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(&collection)
            .map(|docs| docs.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Collection, Documents>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Collection, Documents>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn exists(&self, fingerprint: &str) -> Result<bool> {
        let guard = self.read()?;
        Ok(guard
            .get(&Collection::FileObject)
            .map(|docs| {
                docs.values()
                    .flatten()
                    .any(|d| d.fingerprint.as_deref() == Some(fingerprint))
            })
            .unwrap_or(false))
    }

    async fn replace_documents(
        &self,
        collection: Collection,
        key: &str,
        documents: &[ResultDocument],
    ) -> Result<u64> {
        let mut guard = self.write()?;
        let docs = guard.entry(collection).or_default();
        let removed = docs.remove(key).map(|v| v.len() as u64).unwrap_or(0);
        if !documents.is_empty() {
            docs.insert(key.to_string(), documents.to_vec());
        }
        Ok(removed)
    }

    async fn delete_matching(&self, collection: Collection, pattern: &str) -> Result<u64> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        let mut guard = self.write()?;
        let Some(docs) = guard.get_mut(&collection) else {
            return Ok(0);
        };
        let mut removed = 0u64;
        docs.retain(|key, v| {
            if matcher.is_match(key) {
                removed += v.len() as u64;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn find_by_key(&self, collection: Collection, key: &str) -> Result<Vec<ResultDocument>> {
        let guard = self.read()?;
        Ok(guard
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, n: i64) -> ResultDocument {
        ResultDocument::new(key, json!({ "n": n }))
    }

    #[tokio::test]
    async fn replace_reports_removed_count() {
        let store = InMemoryStore::new();
        let key = "NL.HGN.02.BHZ.D.2020.001";

        let removed = store
            .replace_document(Collection::Metrics, key, &doc(key, 1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .replace_document(Collection::Metrics, key, &doc(key, 2))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let current = store.find_by_key(Collection::Metrics, key).await.unwrap();
        assert_eq!(current, vec![doc(key, 2)]);
    }

    #[tokio::test]
    async fn replace_many_never_accumulates() {
        let store = InMemoryStore::new();
        let key = "NL.HGN.02.BHZ.D.2020.001";
        let batch: Vec<_> = (0..48).map(|i| doc(key, i)).collect();

        store
            .replace_documents(Collection::Spectra, key, &batch)
            .await
            .unwrap();
        let removed = store
            .replace_documents(Collection::Spectra, key, &batch[..3])
            .await
            .unwrap();
        assert_eq!(removed, 48);
        assert_eq!(store.count(Collection::Spectra), 3);
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let store = InMemoryStore::new();
        let key = "NL.HGN.02.BHZ.D.2020.001";
        store
            .replace_document(Collection::Metrics, key, &doc(key, 1))
            .await
            .unwrap();
        let removed = store
            .replace_document(Collection::FileObject, key, &doc(key, 1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn exists_checks_file_object_fingerprints() {
        let store = InMemoryStore::new();
        let key = "NL.HGN.02.BHZ.D.2020.001";
        assert!(!store.exists("abc").await.unwrap());

        store
            .replace_document(Collection::Metrics, key, &doc(key, 1).with_fingerprint("abc"))
            .await
            .unwrap();
        assert!(!store.exists("abc").await.unwrap());

        store
            .replace_document(Collection::FileObject, key, &doc(key, 1).with_fingerprint("abc"))
            .await
            .unwrap();
        assert!(store.exists("abc").await.unwrap());
    }

    #[tokio::test]
    async fn delete_matching_uses_glob() {
        let store = InMemoryStore::new();
        for key in [
            "NL.HGN.02.BHZ.D.2020.001",
            "NL.HGN.02.BHZ.D.2020.002",
            "GB.PGB1..HHN.D.2014.295",
        ] {
            store
                .replace_document(Collection::Metrics, key, &doc(key, 0))
                .await
                .unwrap();
        }
        let removed = store
            .delete_matching(Collection::Metrics, "NL.HGN.*.2020.*")
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(Collection::Metrics), 1);
        assert_eq!(
            store
                .delete_matching(Collection::Spectra, "*")
                .await
                .unwrap(),
            0
        );
    }
}

//! Result storage abstraction.
//!
//! The [`ResultStore`] trait is the only contract the pipeline needs from a
//! document store: a fingerprint lookup for change detection and
//! replace-on-write by filename key for the per-file task.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Collection, ResultDocument};

/// Abstract document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`exists`](ResultStore::exists) | Is a file object with this fingerprint recorded? |
/// | [`replace_documents`](ResultStore::replace_documents) | Remove all documents under a key, insert new ones |
/// | [`delete_matching`](ResultStore::delete_matching) | Remove documents whose key matches a glob |
/// | [`find_by_key`](ResultStore::find_by_key) | Current documents for a key |
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Whether a [`Collection::FileObject`] document carries this fingerprint.
    async fn exists(&self, fingerprint: &str) -> Result<bool>;

    /// Remove every document stored under `key` in `collection`, then insert
    /// `documents`. Returns the number of documents removed.
    ///
    /// The removal and insertion are applied as one unit; readers never see
    /// a mix of old and new documents.
    async fn replace_documents(
        &self,
        collection: Collection,
        key: &str,
        documents: &[ResultDocument],
    ) -> Result<u64>;

    /// Single-document form of [`replace_documents`](ResultStore::replace_documents).
    async fn replace_document(
        &self,
        collection: Collection,
        key: &str,
        document: &ResultDocument,
    ) -> Result<u64> {
        self.replace_documents(collection, key, std::slice::from_ref(document))
            .await
    }

    /// Remove documents whose key matches a `*`/`?` glob pattern.
    async fn delete_matching(&self, collection: Collection, pattern: &str) -> Result<u64>;

    /// All current documents stored under `key`.
    async fn find_by_key(&self, collection: Collection, key: &str) -> Result<Vec<ResultDocument>>;
}

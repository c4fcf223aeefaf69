//! SQLite-backed [`ResultStore`].
//!
//! All collections share one `documents` table (see [`crate::migrate`]).
//! Replacement runs in a single transaction so a reader never sees a key
//! with both old and new documents.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use wfcollector_core::models::{Collection, ResultDocument};
use wfcollector_core::store::ResultStore;

use crate::config::StoreConfig;
use crate::db;
use crate::error::CollectorError;
use crate::migrate;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and make sure the schema exists.
    pub async fn open(config: &StoreConfig) -> Result<Self, CollectorError> {
        let pool = db::connect(config).await.map_err(|e| {
            CollectorError::StoreUnavailable(format!("{}: {:#}", config.path.display(), e))
        })?;
        migrate::run_migrations(&pool).await.map_err(|e| {
            CollectorError::StoreUnavailable(format!("{}: {:#}", config.path.display(), e))
        })?;
        debug!("Opened result store at {}", config.path.display());
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: Collection) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn exists(&self, fingerprint: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM documents WHERE collection = ? AND fingerprint = ? LIMIT 1",
        )
        .bind(Collection::FileObject.as_str())
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn replace_documents(
        &self,
        collection: Collection,
        key: &str,
        documents: &[ResultDocument],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM documents WHERE collection = ? AND key = ?")
            .bind(collection.as_str())
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let now = chrono::Utc::now().timestamp();
        for doc in documents {
            let body_json = serde_json::to_string(&doc.body)
                .with_context(|| format!("Failed to serialize {} document {}", collection, key))?;
            sqlx::query(
                "INSERT INTO documents (id, collection, key, fingerprint, body_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(collection.as_str())
            .bind(key)
            .bind(doc.fingerprint.as_deref())
            .bind(&body_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_matching(&self, collection: Collection, pattern: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM documents WHERE collection = ? AND key GLOB ?")
            .bind(collection.as_str())
            .bind(pattern)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }

    async fn find_by_key(&self, collection: Collection, key: &str) -> Result<Vec<ResultDocument>> {
        let rows: Vec<(String, Option<String>, String)> = sqlx::query_as(
            "SELECT key, fingerprint, body_json FROM documents
             WHERE collection = ? AND key = ?
             ORDER BY rowid",
        )
        .bind(collection.as_str())
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(key, fingerprint, body_json)| {
                let body = serde_json::from_str(&body_json)
                    .with_context(|| format!("Corrupt {} document for {}", collection, key))?;
                Ok(ResultDocument {
                    key,
                    fingerprint,
                    body,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteStore {
        let config = StoreConfig {
            path: tmp.path().join("data").join("wfcollector.sqlite"),
            max_connections: 1,
        };
        SqliteStore::open(&config).await.unwrap()
    }

    fn doc(key: &str, n: i64) -> ResultDocument {
        ResultDocument::new(key, json!({ "n": n }))
    }

    #[tokio::test]
    async fn replace_reports_removed_count() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let key = "NL.HGN.02.BHZ.D.2020.001";

        let removed = store
            .replace_documents(Collection::Spectra, key, &[doc(key, 1), doc(key, 2)])
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .replace_documents(Collection::Spectra, key, &[doc(key, 3)])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let current = store.find_by_key(Collection::Spectra, key).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].body["n"], 3);
    }

    #[tokio::test]
    async fn exists_looks_only_at_file_objects() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let key = "NL.HGN.02.BHZ.D.2020.001";

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
        assert!(!store.exists("def").await.unwrap());
    }

    #[tokio::test]
    async fn delete_matching_uses_glob() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        for day in 1..=3 {
            let key = format!("NL.HGN.02.BHZ.D.2020.{:03}", day);
            store
                .replace_document(Collection::Metrics, &key, &doc(&key, day))
                .await
                .unwrap();
        }
        store
            .replace_document(
                Collection::Metrics,
                "NL.WIT.02.BHZ.D.2020.001",
                &doc("NL.WIT.02.BHZ.D.2020.001", 9),
            )
            .await
            .unwrap();

        let removed = store
            .delete_matching(Collection::Metrics, "NL.HGN.*")
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count(Collection::Metrics).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reopen_keeps_documents() {
        let tmp = TempDir::new().unwrap();
        let key = "NL.HGN.02.BHZ.D.2020.001";
        {
            let store = open(&tmp).await;
            store
                .replace_document(Collection::FileObject, key, &doc(key, 1))
                .await
                .unwrap();
            store.close().await;
        }
        let store = open(&tmp).await;
        assert_eq!(store.count(Collection::FileObject).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_is_reported() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let config = StoreConfig {
            path: blocker.join("db.sqlite"),
            max_connections: 1,
        };
        let err = SqliteStore::open(&config).await.err().unwrap();
        assert!(matches!(err, CollectorError::StoreUnavailable(_)));
    }
}

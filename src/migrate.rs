use anyhow::Result;
use sqlx::SqlitePool;

/// Create the document table and its indexes. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One table for every collection; `collection` partitions it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            fingerprint TEXT,
            body_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection_key ON documents(collection, key)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_fingerprint ON documents(fingerprint)")
        .execute(pool)
        .await?;

    Ok(())
}

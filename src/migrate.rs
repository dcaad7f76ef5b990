use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::store::ExtractedTable;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation. Shared with tests that build their own pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per uploaded or derived document, with per-stage status
    // columns flattened from the pipeline state object.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            community_id TEXT,
            filename TEXT NOT NULL,
            storage_path TEXT,
            file_size INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT NOT NULL,
            document_type TEXT,
            extracted_text TEXT,
            text_length INTEGER NOT NULL DEFAULT 0,
            page_count INTEGER NOT NULL DEFAULT 0,
            processing_level INTEGER NOT NULL DEFAULT 4,
            parent_document_id TEXT,
            extraction_status TEXT NOT NULL DEFAULT 'pending',
            classification_status TEXT NOT NULL DEFAULT 'pending',
            metadata_status TEXT NOT NULL DEFAULT 'pending',
            chunking_status TEXT NOT NULL DEFAULT 'pending',
            extraction_completed_at INTEGER,
            classification_completed_at INTEGER,
            metadata_completed_at INTEGER,
            chunking_completed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (parent_document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per classification attempt; history retained for audit,
    // the latest row carries is_current = 1.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_results (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            document_type TEXT NOT NULL,
            confidence REAL NOT NULL,
            method TEXT NOT NULL,
            reasoning TEXT NOT NULL DEFAULT '',
            processing_ms INTEGER NOT NULL DEFAULT 0,
            is_current INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One structured-extraction table per document type. Uniform shape:
    // typed columns for commonly-queried fields plus a free-form JSON
    // payload. document_id is UNIQUE so re-runs upsert, never duplicate.
    for table in ExtractedTable::ALL {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL UNIQUE,
                organization_id TEXT NOT NULL,
                doc_date TEXT,
                amount REAL,
                counterparty TEXT,
                fields_json TEXT NOT NULL DEFAULT '{{}}',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
            table.table_name()
        );
        sqlx::query(&ddl).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent_document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_organization ON documents(organization_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classification_document ON classification_results(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;

    Ok(())
}

//! Persistence layer.
//!
//! Every structured write is scoped to the owning tenant: rows are
//! stamped with `{document_id, organization_id}` and the stamp comes
//! from looking up the parent document at write time. A write never
//! succeeds without it — an unresolvable organization aborts the write
//! instead of producing an orphaned record.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    Chunk, ClassificationResult, Document, DocumentType, ExtractedData, Stage, StageStatus,
};
use crate::state::PipelineState;

/// Persistence error. `DocumentNotFound` and `MissingOrganization` are
/// precondition failures the orchestrator converts into stage failures;
/// `Database` indicates systemic trouble and propagates.
#[derive(Debug)]
pub enum StoreError {
    DocumentNotFound(String),
    MissingOrganization(String),
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DocumentNotFound(id) => write!(f, "document {} not found", id),
            StoreError::MissingOrganization(id) => {
                write!(f, "document {} has no resolvable organization", id)
            }
            StoreError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

/// Closed set of structured-extraction tables, one per supported type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractedTable {
    Minutes,
    Invoices,
    Contracts,
    DeliveryNotes,
    Communications,
    Deeds,
    Budgets,
}

impl ExtractedTable {
    pub const ALL: [ExtractedTable; 7] = [
        ExtractedTable::Minutes,
        ExtractedTable::Invoices,
        ExtractedTable::Contracts,
        ExtractedTable::DeliveryNotes,
        ExtractedTable::Communications,
        ExtractedTable::Deeds,
        ExtractedTable::Budgets,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            ExtractedTable::Minutes => "extracted_minutes",
            ExtractedTable::Invoices => "extracted_invoices",
            ExtractedTable::Contracts => "extracted_contracts",
            ExtractedTable::DeliveryNotes => "extracted_delivery_notes",
            ExtractedTable::Communications => "extracted_communications",
            ExtractedTable::Deeds => "extracted_deeds",
            ExtractedTable::Budgets => "extracted_budgets",
        }
    }

    /// Table for a document type; `Bundle` has none.
    pub fn for_type(document_type: DocumentType) -> Option<Self> {
        match document_type {
            DocumentType::Minutes => Some(ExtractedTable::Minutes),
            DocumentType::Invoice => Some(ExtractedTable::Invoices),
            DocumentType::Contract => Some(ExtractedTable::Contracts),
            DocumentType::DeliveryNote => Some(ExtractedTable::DeliveryNotes),
            DocumentType::Communication => Some(ExtractedTable::Communications),
            DocumentType::PropertyDeed => Some(ExtractedTable::Deeds),
            DocumentType::Budget => Some(ExtractedTable::Budgets),
            DocumentType::Bundle => None,
        }
    }
}

/// Fields for a new document row. Statuses start `pending`.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub organization_id: String,
    pub community_id: Option<String>,
    pub filename: String,
    pub storage_path: Option<String>,
    pub file_size: i64,
    pub content_hash: String,
    pub processing_level: i64,
    pub parent_document_id: Option<String>,
}

pub async fn create_document(pool: &SqlitePool, new: &NewDocument) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (
            id, organization_id, community_id, filename, storage_path,
            file_size, content_hash, processing_level, parent_document_id,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.organization_id)
    .bind(&new.community_id)
    .bind(&new.filename)
    .bind(&new.storage_path)
    .bind(new.file_size)
    .bind(&new.content_hash)
    .bind(new.processing_level.clamp(1, 4))
    .bind(&new.parent_document_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>, StoreError> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| row_to_document(&r)))
}

pub async fn list_children(
    pool: &SqlitePool,
    parent_id: &str,
) -> Result<Vec<Document>, StoreError> {
    // created_at has second resolution, so siblings created in the same
    // second would tie; rowid preserves insertion order exactly.
    let rows = sqlx::query(
        "SELECT * FROM documents WHERE parent_document_id = ? ORDER BY rowid",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_document).collect())
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        community_id: row.get("community_id"),
        filename: row.get("filename"),
        storage_path: row.get("storage_path"),
        file_size: row.get("file_size"),
        content_hash: row.get("content_hash"),
        document_type: row.get("document_type"),
        extracted_text: row.get("extracted_text"),
        text_length: row.get("text_length"),
        page_count: row.get("page_count"),
        processing_level: row.get("processing_level"),
        parent_document_id: row.get("parent_document_id"),
        extraction_status: row.get("extraction_status"),
        classification_status: row.get("classification_status"),
        metadata_status: row.get("metadata_status"),
        chunking_status: row.get("chunking_status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Rehydrate the state machine from persisted columns. Unparseable
/// status strings degrade to `pending`.
pub fn load_state(doc: &Document) -> PipelineState {
    let parse = |s: &str| StageStatus::parse(s).unwrap_or(StageStatus::Pending);
    PipelineState {
        processing_level: doc.processing_level,
        extraction: parse(&doc.extraction_status),
        classification: parse(&doc.classification_status),
        metadata: parse(&doc.metadata_status),
        chunking: parse(&doc.chunking_status),
    }
}

/// Flatten one stage's status to its column; stamps the completion
/// timestamp when the stage reaches a terminal satisfied state.
pub async fn update_stage_status(
    pool: &SqlitePool,
    document_id: &str,
    stage: Stage,
    status: StageStatus,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();
    // Column names come from the closed Stage enum, not caller input.
    let sql = if status.satisfies_gate() {
        format!(
            "UPDATE documents SET {stage}_status = ?, {stage}_completed_at = ?, updated_at = ? WHERE id = ?",
            stage = stage.as_str()
        )
    } else {
        format!(
            "UPDATE documents SET {stage}_status = ?, updated_at = ? WHERE id = ?",
            stage = stage.as_str()
        )
    };

    let query = sqlx::query(&sql).bind(status.as_str());
    let query = if status.satisfies_gate() {
        query.bind(now).bind(now).bind(document_id)
    } else {
        query.bind(now).bind(document_id)
    };
    let result = query.execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::DocumentNotFound(document_id.to_string()));
    }
    Ok(())
}

pub async fn store_extracted_text(
    pool: &SqlitePool,
    document_id: &str,
    text: &str,
    page_count: i64,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "UPDATE documents SET extracted_text = ?, text_length = ?, page_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(text)
    // Char count, not bytes: fragment offsets index characters.
    .bind(text.chars().count() as i64)
    .bind(page_count)
    .bind(now)
    .bind(document_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::DocumentNotFound(document_id.to_string()));
    }
    Ok(())
}

pub async fn set_document_type(
    pool: &SqlitePool,
    document_id: &str,
    document_type: DocumentType,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query("UPDATE documents SET document_type = ?, updated_at = ? WHERE id = ?")
        .bind(document_type.as_str())
        .bind(now)
        .bind(document_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::DocumentNotFound(document_id.to_string()));
    }
    Ok(())
}

/// Resolve the owning tenant for a document. The tenant stamp for every
/// structured write comes through here.
pub async fn organization_for_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<String, StoreError> {
    let org: Option<String> =
        sqlx::query_scalar("SELECT organization_id FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(pool)
            .await?;

    match org {
        None => Err(StoreError::DocumentNotFound(document_id.to_string())),
        Some(org) if org.trim().is_empty() => {
            Err(StoreError::MissingOrganization(document_id.to_string()))
        }
        Some(org) => Ok(org),
    }
}

/// Insert one structured record stamped with the owning tenant.
/// History-preserving: a corrective re-run inserts a new row.
pub async fn insert_with_organization(
    pool: &SqlitePool,
    table: ExtractedTable,
    document_id: &str,
    data: &ExtractedData,
) -> Result<String, StoreError> {
    let organization_id = organization_for_document(pool, document_id).await?;
    write_extracted(pool, table, document_id, &organization_id, data, false).await
}

/// Upsert variant keyed by `document_id`: re-running extraction for the
/// same document replaces the record instead of duplicating it.
pub async fn upsert_with_organization(
    pool: &SqlitePool,
    table: ExtractedTable,
    document_id: &str,
    data: &ExtractedData,
) -> Result<String, StoreError> {
    let organization_id = organization_for_document(pool, document_id).await?;
    write_extracted(pool, table, document_id, &organization_id, data, true).await
}

async fn write_extracted(
    pool: &SqlitePool,
    table: ExtractedTable,
    document_id: &str,
    organization_id: &str,
    data: &ExtractedData,
    upsert: bool,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    let fields_json =
        serde_json::to_string(&data.fields).unwrap_or_else(|_| "{}".to_string());

    let conflict_clause = if upsert {
        r#"
        ON CONFLICT(document_id) DO UPDATE SET
            organization_id = excluded.organization_id,
            doc_date = excluded.doc_date,
            amount = excluded.amount,
            counterparty = excluded.counterparty,
            fields_json = excluded.fields_json,
            created_at = excluded.created_at
        "#
    } else {
        ""
    };

    let sql = format!(
        r#"
        INSERT INTO {} (id, document_id, organization_id, doc_date, amount, counterparty, fields_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        {}
        "#,
        table.table_name(),
        conflict_clause
    );

    sqlx::query(&sql)
        .bind(&id)
        .bind(document_id)
        .bind(organization_id)
        .bind(&data.doc_date)
        .bind(data.amount)
        .bind(&data.counterparty)
        .bind(&fields_json)
        .bind(now)
        .execute(pool)
        .await?;

    Ok(id)
}

/// Record one classification attempt. Previous attempts stay for audit;
/// only the newest row carries `is_current = 1`.
pub async fn insert_classification(
    pool: &SqlitePool,
    document_id: &str,
    result: &ClassificationResult,
) -> Result<String, StoreError> {
    let organization_id = organization_for_document(pool, document_id).await?;
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE classification_results SET is_current = 0 WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO classification_results
            (id, document_id, organization_id, document_type, confidence, method, reasoning, processing_ms, is_current, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(&id)
    .bind(document_id)
    .bind(&organization_id)
    .bind(result.document_type.as_str())
    .bind(result.confidence)
    .bind(&result.method)
    .bind(&result.reasoning)
    .bind(result.processing_ms as i64)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(id)
}

/// Replace a document's chunks transactionally (delete + insert).
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<(), StoreError> {
    let organization_id = organization_for_document(pool, document_id).await?;

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, organization_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&organization_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

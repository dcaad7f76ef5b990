//! Integration tests for the persistence layer: tenant stamping,
//! upsert idempotence, classification history, and chunk replacement.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

use ingesta::migrate::apply_schema;
use ingesta::models::{
    Chunk, ClassificationResult, DocumentType, ExtractedData, Stage, StageStatus,
};
use ingesta::store::{self, ExtractedTable, NewDocument, StoreError};

async fn test_pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("ingesta.sqlite");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    (tmp, pool)
}

fn new_document(org: &str) -> NewDocument {
    NewDocument {
        organization_id: org.to_string(),
        community_id: Some("comunidad-7".to_string()),
        filename: "factura_luz.pdf".to_string(),
        storage_path: None,
        file_size: 1234,
        content_hash: "abc123".to_string(),
        processing_level: 4,
        parent_document_id: None,
    }
}

#[tokio::test]
async fn create_and_get_roundtrip() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    let doc = store::get_document(&pool, &id).await.unwrap().unwrap();
    assert_eq!(doc.organization_id, "org-a");
    assert_eq!(doc.filename, "factura_luz.pdf");
    assert_eq!(doc.extraction_status, "pending");
    assert_eq!(doc.processing_level, 4);
    assert!(doc.document_type.is_none());
}

#[tokio::test]
async fn extracted_rows_carry_tenant_stamp() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    let data = ExtractedData {
        doc_date: Some("2024-03-12".to_string()),
        amount: Some(1250.40),
        counterparty: Some("Limpiezas Sol SL".to_string()),
        ..Default::default()
    };
    store::insert_with_organization(&pool, ExtractedTable::Invoices, &id, &data)
        .await
        .unwrap();

    let row = sqlx::query("SELECT organization_id, document_id FROM extracted_invoices")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("organization_id"), "org-a");
    assert_eq!(row.get::<String, _>("document_id"), id);
}

#[tokio::test]
async fn write_for_unknown_document_is_rejected() {
    let (_tmp, pool) = test_pool().await;
    let data = ExtractedData {
        amount: Some(10.0),
        ..Default::default()
    };
    let err = store::insert_with_organization(&pool, ExtractedTable::Invoices, "no-such-id", &data)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DocumentNotFound(_)));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM extracted_invoices")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn upsert_keeps_one_row_per_document() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    let first = ExtractedData {
        amount: Some(100.0),
        ..Default::default()
    };
    let second = ExtractedData {
        amount: Some(250.0),
        counterparty: Some("Ascensores Norte".to_string()),
        ..Default::default()
    };
    store::upsert_with_organization(&pool, ExtractedTable::Invoices, &id, &first)
        .await
        .unwrap();
    store::upsert_with_organization(&pool, ExtractedTable::Invoices, &id, &second)
        .await
        .unwrap();

    let rows = sqlx::query("SELECT amount, counterparty FROM extracted_invoices WHERE document_id = ?")
        .bind(&id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<f64, _>("amount"), 250.0);
    assert_eq!(
        rows[0].get::<String, _>("counterparty"),
        "Ascensores Norte"
    );
}

#[tokio::test]
async fn classification_history_flips_is_current() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    let first = ClassificationResult {
        document_type: DocumentType::Communication,
        confidence: 0.2,
        method: "default".to_string(),
        reasoning: "no signal".to_string(),
        processing_ms: 1,
    };
    let second = ClassificationResult {
        document_type: DocumentType::Invoice,
        confidence: 0.9,
        method: "ai".to_string(),
        reasoning: "mentions importe and IVA".to_string(),
        processing_ms: 40,
    };
    store::insert_classification(&pool, &id, &first).await.unwrap();
    store::insert_classification(&pool, &id, &second).await.unwrap();

    let rows = sqlx::query(
        "SELECT document_type, is_current FROM classification_results WHERE document_id = ? ORDER BY created_at, is_current",
    )
    .bind(&id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);

    let current: Vec<&sqlx::sqlite::SqliteRow> = rows
        .iter()
        .filter(|r| r.get::<i64, _>("is_current") == 1)
        .collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].get::<String, _>("document_type"), "factura");
}

#[tokio::test]
async fn stage_status_updates_flatten_to_columns() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    store::update_stage_status(&pool, &id, Stage::Extraction, StageStatus::Processing)
        .await
        .unwrap();
    store::update_stage_status(&pool, &id, Stage::Extraction, StageStatus::Completed)
        .await
        .unwrap();

    let doc = store::get_document(&pool, &id).await.unwrap().unwrap();
    assert_eq!(doc.extraction_status, "completed");
    assert_eq!(doc.classification_status, "pending");

    let completed_at: Option<i64> =
        sqlx::query_scalar("SELECT extraction_completed_at FROM documents WHERE id = ?")
            .bind(&id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(completed_at.is_some());
}

#[tokio::test]
async fn load_state_rehydrates_statuses() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();
    store::update_stage_status(&pool, &id, Stage::Extraction, StageStatus::Processing)
        .await
        .unwrap();
    store::update_stage_status(&pool, &id, Stage::Extraction, StageStatus::Completed)
        .await
        .unwrap();

    let doc = store::get_document(&pool, &id).await.unwrap().unwrap();
    let state = store::load_state(&doc);
    assert_eq!(state.status(Stage::Extraction), StageStatus::Completed);
    assert_eq!(state.status(Stage::Classification), StageStatus::Pending);
    assert_eq!(state.next_runnable(), Some(Stage::Classification));
}

#[tokio::test]
async fn replace_chunks_is_atomic_per_document() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-b"))
        .await
        .unwrap();

    let old = vec![chunk(&id, 0, "old text")];
    store::replace_chunks(&pool, &id, &old).await.unwrap();

    let new = vec![chunk(&id, 0, "new text"), chunk(&id, 1, "more text")];
    store::replace_chunks(&pool, &id, &new).await.unwrap();

    let rows = sqlx::query("SELECT organization_id, text FROM chunks WHERE document_id = ? ORDER BY chunk_index")
        .bind(&id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<String, _>("text"), "new text");
    assert_eq!(rows[0].get::<String, _>("organization_id"), "org-b");
}

#[tokio::test]
async fn children_are_listed_in_creation_order() {
    let (_tmp, pool) = test_pool().await;
    let parent = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    // Filenames deliberately out of alphabetical order: only insertion
    // order explains the expected listing.
    let filenames = [
        "bundle_fragment_1_factura.txt",
        "bundle_fragment_2_acta.txt",
        "bundle_fragment_3_contrato.txt",
    ];
    for filename in filenames {
        let mut child = new_document("org-a");
        child.filename = filename.to_string();
        child.parent_document_id = Some(parent.clone());
        store::create_document(&pool, &child).await.unwrap();
    }

    // Force a created_at tie across all siblings; second-resolution
    // timestamps make this the common case for bundle children anyway.
    sqlx::query("UPDATE documents SET created_at = 1700000000 WHERE parent_document_id = ?")
        .bind(&parent)
        .execute(&pool)
        .await
        .unwrap();

    let children = store::list_children(&pool, &parent).await.unwrap();
    assert_eq!(children.len(), 3);
    for (child, expected) in children.iter().zip(filenames) {
        assert_eq!(child.filename, expected);
        assert_eq!(child.parent_document_id.as_deref(), Some(parent.as_str()));
    }
}

#[tokio::test]
async fn text_length_counts_chars_not_bytes() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    // Accented text: byte length differs from the char count the
    // analyzer's fragment offsets index by.
    let text = "Señoría: el año próximo, 1.250,40 €";
    store::store_extracted_text(&pool, &id, text, 1).await.unwrap();

    let doc = store::get_document(&pool, &id).await.unwrap().unwrap();
    assert_eq!(doc.text_length, text.chars().count() as i64);
    assert_ne!(doc.text_length, text.len() as i64);
}

#[tokio::test]
async fn every_extracted_table_accepts_a_stamped_row() {
    let (_tmp, pool) = test_pool().await;
    let id = store::create_document(&pool, &new_document("org-a"))
        .await
        .unwrap();

    for table in ExtractedTable::ALL {
        let data = ExtractedData {
            doc_date: Some("2024-01-01".to_string()),
            ..Default::default()
        };
        store::upsert_with_organization(&pool, table, &id, &data)
            .await
            .unwrap();

        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE organization_id = 'org-a'",
            table.table_name()
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&pool).await.unwrap();
        assert_eq!(count, 1, "table {}", table.table_name());
    }
}

fn chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: format!("hash-{}", index),
    }
}

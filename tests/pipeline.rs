//! End-to-end pipeline tests over a temporary SQLite database with a
//! scripted AI client. Uploaded bytes are deliberately not valid PDFs,
//! so the extraction cascade falls through to the vision tier, which
//! the scripted client answers with canned text.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

use ingesta::ai::AiClient;
use ingesta::config::{
    AiConfig, ChunkingConfig, ClassificationConfig, Config, DbConfig, ExtractionConfig,
    ServerConfig,
};
use ingesta::migrate::apply_schema;
use ingesta::models::Stage;
use ingesta::pipeline::{Pipeline, UploadRequest};
use ingesta::store;

/// Scripted client: routes each call by the system prompt it receives,
/// so one instance can serve boundary detection, classification, and
/// structured extraction in a single pipeline run.
struct ScriptedClient {
    vision: anyhow::Result<String>,
    boundary: String,
    classify: String,
    metadata: String,
}

impl ScriptedClient {
    fn single_document(vision_text: &str, classify: &str, metadata: &str) -> Self {
        Self {
            vision: Ok(vision_text.to_string()),
            boundary: r#"{"is_multi_document": false, "documents": []}"#.to_string(),
            classify: classify.to_string(),
            metadata: metadata.to_string(),
        }
    }
}

#[async_trait]
impl AiClient for ScriptedClient {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, _user: &str) -> anyhow::Result<String> {
        if system.contains("is_multi_document") {
            Ok(self.boundary.clone())
        } else if system.contains("You classify") {
            Ok(self.classify.clone())
        } else {
            Ok(self.metadata.clone())
        }
    }

    async fn complete_vision(
        &self,
        _prompt: &str,
        _bytes: &[u8],
        _mime: &str,
    ) -> anyhow::Result<String> {
        match &self.vision {
            Ok(text) => Ok(text.clone()),
            Err(e) => anyhow::bail!("{}", e),
        }
    }
}

fn test_config(db_path: &Path) -> Config {
    Config {
        db: DbConfig {
            path: db_path.to_path_buf(),
        },
        extraction: ExtractionConfig {
            min_text_length: 20,
            quality_threshold: 0.0,
            ocr_enabled: false,
            ..Default::default()
        },
        classification: ClassificationConfig {
            use_ai: true,
            low_confidence: 0.5,
        },
        ai: AiConfig::default(),
        chunking: ChunkingConfig { max_tokens: 50 },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

async fn test_pipeline(client: ScriptedClient) -> (TempDir, SqlitePool, Pipeline) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("ingesta.sqlite");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();

    let config = test_config(&db_path);
    let pipeline = Pipeline::new(pool.clone(), config, Arc::new(client));
    (tmp, pool, pipeline)
}

fn upload(filename: &str, level: i64) -> UploadRequest {
    UploadRequest {
        filename: filename.to_string(),
        organization_id: "org-a".to_string(),
        community_id: Some("comunidad-7".to_string()),
        processing_level: level,
        storage_path: None,
    }
}

const INVOICE_TEXT: &str = "FACTURA Nº A-2031\nProveedor: Limpiezas Sol SL\nCIF: B12345678\n\
Fecha: 12/03/2024\nConcepto: limpieza mensual de zonas comunes del edificio\n\
Importe total: 1.250,40 €\nForma de pago: transferencia bancaria a 30 dias";

#[tokio::test]
async fn single_invoice_runs_all_four_stages() {
    let client = ScriptedClient::single_document(
        INVOICE_TEXT,
        r#"{"document_type": "factura", "confidence": 0.92, "reasoning": "header says FACTURA"}"#,
        r#"{"doc_date": "2024-03-12", "amount": 1250.40, "counterparty": "Limpiezas Sol SL",
            "fields": {"invoice_number": "A-2031", "tax_id": "B12345678"}}"#,
    );
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("scan_001.pdf", 4))
        .await
        .unwrap();

    assert!(!outcome.is_multi_document);
    assert!(outcome.document.failures.is_empty());

    let doc = store::get_document(&pool, &outcome.document.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.document_type.as_deref(), Some("factura"));
    assert_eq!(doc.extraction_status, "completed");
    assert_eq!(doc.classification_status, "completed");
    assert_eq!(doc.metadata_status, "completed");
    assert_eq!(doc.chunking_status, "completed");
    assert_eq!(doc.extracted_text.as_deref(), Some(INVOICE_TEXT));

    let row = sqlx::query(
        "SELECT organization_id, amount, counterparty FROM extracted_invoices WHERE document_id = ?",
    )
    .bind(&doc.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<String, _>("organization_id"), "org-a");
    assert_eq!(row.get::<f64, _>("amount"), 1250.40);

    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(&doc.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(chunks > 0);
}

#[tokio::test]
async fn extraction_failure_marks_stage_failed_and_halts() {
    let client = ScriptedClient {
        vision: Err(anyhow::anyhow!("vision provider unavailable")),
        boundary: String::new(),
        classify: String::new(),
        metadata: String::new(),
    };
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("scan_002.pdf", 4))
        .await
        .unwrap();

    assert_eq!(outcome.document.extraction_status, "failed");
    assert_eq!(outcome.document.classification_status, "pending");
    assert_eq!(outcome.document.failures.len(), 1);
    assert_eq!(outcome.document.failures[0].stage, "extraction");

    // Nothing downstream was written.
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunks, 0);
}

#[tokio::test]
async fn inconclusive_classification_defaults_and_proceeds() {
    let client = ScriptedClient::single_document(
        "Texto de un documento sin cabecera reconocible pero con contenido legible.\n\
         Aviso general para todos los vecinos del edificio sobre el proximo cierre.",
        "this is not json at all",
        r#"{"doc_date": null, "counterparty": null, "fields": {"subject": "Aviso general"}}"#,
    );
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("scan_003.pdf", 4))
        .await
        .unwrap();
    assert!(outcome.document.failures.is_empty());

    let doc = store::get_document(&pool, &outcome.document.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.document_type.as_deref(), Some("comunicado"));
    assert_eq!(doc.metadata_status, "completed");

    let row = sqlx::query(
        "SELECT method, confidence FROM classification_results WHERE document_id = ? AND is_current = 1",
    )
    .bind(&doc.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<String, _>("method"), "default");
    assert!(row.get::<f64, _>("confidence") < 0.5);
}

#[tokio::test]
async fn metadata_failure_halts_chunking_but_keeps_classification() {
    // AI metadata answer is garbage and the text offers the regex
    // fallback nothing to grab onto.
    let client = ScriptedClient::single_document(
        "Texto manuscrito apenas legible sin estructura reconocible alguna, \
         sin cifras ni referencias que permitan recuperar campo alguno.",
        r#"{"document_type": "factura", "confidence": 0.7, "reasoning": "guess"}"#,
        "garbage, not json",
    );
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("scan_004.pdf", 4))
        .await
        .unwrap();

    assert_eq!(outcome.document.metadata_status, "failed");
    assert_eq!(outcome.document.chunking_status, "pending");
    assert_eq!(outcome.document.classification_status, "completed");
    assert_eq!(outcome.document.failures.len(), 1);
    assert_eq!(outcome.document.failures[0].stage, "metadata");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM extracted_invoices")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn retry_resumes_from_failed_stage() {
    let bad = ScriptedClient::single_document(
        "Texto manuscrito apenas legible sin estructura reconocible alguna, \
         sin cifras ni referencias que permitan recuperar campo alguno.",
        r#"{"document_type": "factura", "confidence": 0.7, "reasoning": "guess"}"#,
        "garbage, not json",
    );
    let (tmp, pool, pipeline) = test_pipeline(bad).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("scan_005.pdf", 4))
        .await
        .unwrap();
    let id = outcome.document.document_id.clone();
    assert_eq!(outcome.document.metadata_status, "failed");

    // Same database, repaired provider.
    let good = ScriptedClient::single_document(
        "",
        "",
        r#"{"doc_date": "2024-05-01", "amount": 99.0, "counterparty": "Proveedor SA", "fields": {}}"#,
    );
    let db_path = tmp.path().join("ingesta.sqlite");
    let repaired = Pipeline::new(pool.clone(), test_config(&db_path), Arc::new(good));

    let failures = repaired.retry_stage(&id, Stage::Metadata).await.unwrap();
    assert!(failures.is_empty());

    let doc = store::get_document(&pool, &id).await.unwrap().unwrap();
    assert_eq!(doc.metadata_status, "completed");
    assert_eq!(doc.chunking_status, "completed");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM extracted_invoices WHERE document_id = ?")
        .bind(&id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn level_two_stops_after_classification() {
    let client = ScriptedClient::single_document(
        INVOICE_TEXT,
        r#"{"document_type": "factura", "confidence": 0.92, "reasoning": "header"}"#,
        r#"{"amount": 1.0, "fields": {}}"#,
    );
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("scan_006.pdf", 2))
        .await
        .unwrap();
    assert!(outcome.document.failures.is_empty());

    let doc = store::get_document(&pool, &outcome.document.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.extraction_status, "completed");
    assert_eq!(doc.classification_status, "completed");
    assert_eq!(doc.metadata_status, "pending");
    assert_eq!(doc.chunking_status, "pending");

    let extracted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM extracted_invoices")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(extracted, 0);
}

#[tokio::test]
async fn bundle_materializes_only_supported_fragments() {
    // Three sections: an invoice, minutes, and an unsupported tail.
    let section_a = "FACTURA Nº 7\nProveedor: Jardines Verdes SL\nFecha: 01/02/2024\n\
                     Importe total: 300,00 €\nConcepto: mantenimiento de jardines comunitarios";
    let section_b = "ACTA DE LA JUNTA ORDINARIA\nCelebrada el 15 de febrero de 2024 en el portal.\n\
                     Asistentes: presidente, administrador y doce propietarios del inmueble.";
    let section_c = "Notas internas sin clasificar, borrador de apuntes varios del administrador \
                     que no corresponden a ningun documento oficial de la comunidad.";
    let full_text = format!("{}\n{}\n{}", section_a, section_b, section_c);

    let a_end = section_a.chars().count();
    let b_start = a_end + 1;
    let b_end = b_start + section_b.chars().count();
    let c_start = b_end + 1;
    let c_end = full_text.chars().count();

    let boundary = format!(
        r#"{{"is_multi_document": true, "documents": [
            {{"document_type": "factura", "title": "Factura jardines", "start_offset": 0, "end_offset": {}}},
            {{"document_type": "acta", "title": "Acta junta ordinaria", "start_offset": {}, "end_offset": {}}},
            {{"document_type": "other", "title": "Notas", "start_offset": {}, "end_offset": {}}}
        ]}}"#,
        a_end, b_start, b_end, c_start, c_end
    );

    let client = ScriptedClient {
        vision: Ok(full_text.clone()),
        boundary,
        classify: r#"{"document_type": "comunicado", "confidence": 0.6, "reasoning": "fallback"}"#
            .to_string(),
        metadata: r#"{"doc_date": "2024-02-01", "fields": {}}"#.to_string(),
    };
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("documentos_escaneados.pdf", 4))
        .await
        .unwrap();

    assert!(outcome.is_multi_document);
    assert_eq!(outcome.detected_documents.len(), 3);
    assert_eq!(outcome.children.len(), 2);

    let parent = store::get_document(&pool, &outcome.document.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.document_type.as_deref(), Some("multidocumento"));
    assert_eq!(parent.extraction_status, "completed");
    assert_eq!(parent.classification_status, "completed");
    assert_eq!(parent.metadata_status, "skipped");
    assert_eq!(parent.chunking_status, "skipped");

    let children = store::list_children(&pool, &parent.id).await.unwrap();
    assert_eq!(children.len(), 2);
    // Synthesized fragment names carry the type label, so the filename
    // heuristic classifies children without another AI round trip.
    assert_eq!(children[0].document_type.as_deref(), Some("factura"));
    assert_eq!(children[1].document_type.as_deref(), Some("acta"));
    for child in &children {
        assert_eq!(child.organization_id, "org-a");
        assert_eq!(child.extraction_status, "completed");
        assert_eq!(child.chunking_status, "completed");
    }

    // Fragment text, not the whole bundle, is what each child carries.
    assert!(children[0]
        .extracted_text
        .as_deref()
        .unwrap()
        .contains("Jardines Verdes"));
    assert!(!children[0]
        .extracted_text
        .as_deref()
        .unwrap()
        .contains("ACTA DE LA JUNTA"));
}

#[tokio::test]
async fn sibling_failure_does_not_block_other_children() {
    // Second fragment's text gives the metadata fallback nothing, and
    // the scripted metadata answer is garbage, so its metadata stage
    // fails while the first child completes.
    let section_a = "FACTURA Nº 9\nProveedor: Fontaneria Ruiz SL\nFecha: 02/03/2024\n\
                     Importe total: 120,00 €\nConcepto: reparacion urgente de la bomba de agua";
    let section_b = "ESCRITURA ilegible sin notario identificable ni fecha alguna, texto \
                     degradado por la copia que impide recuperar referencias concretas.";
    let full_text = format!("{}\n{}", section_a, section_b);

    let a_end = section_a.chars().count();
    let b_start = a_end + 1;
    let b_end = full_text.chars().count();

    let boundary = format!(
        r#"{{"is_multi_document": true, "documents": [
            {{"document_type": "factura", "title": "Factura fontaneria", "start_offset": 0, "end_offset": {}}},
            {{"document_type": "escritura", "title": "Escritura", "start_offset": {}, "end_offset": {}}}
        ]}}"#,
        a_end, b_start, b_end
    );

    let client = ScriptedClient {
        vision: Ok(full_text.clone()),
        boundary,
        classify: String::new(),
        metadata: "garbage, not json".to_string(),
    };
    let (_tmp, pool, pipeline) = test_pipeline(client).await;

    let outcome = pipeline
        .process_upload(b"not a pdf", &upload("lote_marzo.pdf", 4))
        .await
        .unwrap();

    assert_eq!(outcome.children.len(), 2);
    let children = store::list_children(&pool, &outcome.document.document_id)
        .await
        .unwrap();

    // Invoice fragment recovers fields through the regex fallback.
    assert_eq!(children[0].document_type.as_deref(), Some("factura"));
    assert_eq!(children[0].metadata_status, "completed");
    assert_eq!(children[0].chunking_status, "completed");

    // Deed fragment fails metadata; its chunking is blocked, but the
    // sibling above is untouched.
    assert_eq!(children[1].document_type.as_deref(), Some("escritura"));
    assert_eq!(children[1].metadata_status, "failed");
    assert_eq!(children[1].chunking_status, "pending");
}

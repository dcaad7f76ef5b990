//! Stage orchestrator.
//!
//! Drives a document through extraction, classification, structured
//! metadata and chunking, in that order, persisting every status
//! transition through the state machine. A stage failure is recorded
//! and halts automatic progression for that document without touching
//! the results of earlier stages; re-runs are always explicit.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::ai::AiClient;
use crate::analyze::Analyzer;
use crate::chunk::chunk_text;
use crate::classify::classify;
use crate::config::Config;
use crate::extract::TextExtractor;
use crate::extractors::extractor_for;
use crate::models::{
    ClassificationResult, DetectedSubDocument, Document, DocumentType, Stage, StageStatus,
};
use crate::state::StateError;
use crate::store::{self, ExtractedTable, NewDocument, StoreError};

/// Fragments shorter than this never become child documents.
pub const MIN_FRAGMENT_CHARS: usize = 40;

/// Systemic orchestration error. Per-stage failures are not errors at
/// this level; they are recorded in the outcome and the status columns.
#[derive(Debug)]
pub enum PipelineError {
    DocumentNotFound(String),
    Store(StoreError),
    State(StateError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::DocumentNotFound(id) => write!(f, "document {} not found", id),
            PipelineError::Store(e) => write!(f, "{}", e),
            PipelineError::State(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store(e)
    }
}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        PipelineError::State(e)
    }
}

/// One recorded stage failure, surfaced in upload responses.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: String,
    pub message: String,
}

/// Final stage snapshot for one document after a pipeline run.
#[derive(Debug, Serialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub filename: String,
    pub document_type: Option<String>,
    pub extraction_status: String,
    pub classification_status: String,
    pub metadata_status: String,
    pub chunking_status: String,
    pub failures: Vec<StageFailure>,
}

impl DocumentOutcome {
    fn from_document(doc: &Document, failures: Vec<StageFailure>) -> Self {
        Self {
            document_id: doc.id.clone(),
            filename: doc.filename.clone(),
            document_type: doc.document_type.clone(),
            extraction_status: doc.extraction_status.clone(),
            classification_status: doc.classification_status.clone(),
            metadata_status: doc.metadata_status.clone(),
            chunking_status: doc.chunking_status.clone(),
            failures,
        }
    }
}

/// Result of ingesting one uploaded file. For a bundle, `document` is
/// the parent and `children` holds one entry per materialized fragment.
#[derive(Debug, Serialize)]
pub struct UploadOutcome {
    pub is_multi_document: bool,
    pub detected_documents: Vec<DetectedSubDocument>,
    pub document: DocumentOutcome,
    pub children: Vec<DocumentOutcome>,
    /// Full extracted text, kept for callers that separate fragments to
    /// disk after ingestion. Not part of the wire response.
    #[serde(skip)]
    pub extracted_text: String,
}

/// Parameters for one upload, independent of transport.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub organization_id: String,
    pub community_id: Option<String>,
    pub processing_level: i64,
    /// Where the original bytes live on disk, if they were persisted.
    /// Required for later extraction re-runs.
    pub storage_path: Option<String>,
}

enum StageOutcome {
    Completed,
    Skipped,
}

pub struct Pipeline {
    pool: SqlitePool,
    config: Config,
    client: Arc<dyn AiClient>,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, config: Config, client: Arc<dyn AiClient>) -> Self {
        Self {
            pool,
            config,
            client,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn extractor(&self) -> TextExtractor {
        TextExtractor::new(&self.config.extraction, self.client.clone())
    }

    /// Analyzer configured like the ingestion path, for callers that
    /// want boundary detection without touching the database.
    pub fn analyzer(&self) -> Analyzer {
        Analyzer::new(self.extractor(), self.client.clone(), MIN_FRAGMENT_CHARS)
    }

    /// Ingest one uploaded file end to end.
    ///
    /// The file is first analyzed for internal boundaries. A bundle is
    /// typed `multidocumento` and split: each supported fragment becomes
    /// a child document carrying the fragment text, and the remaining
    /// stages run per child. A single document runs straight through.
    pub async fn process_upload(
        &self,
        bytes: &[u8],
        request: &UploadRequest,
    ) -> Result<UploadOutcome, PipelineError> {
        let content_hash = hex_digest(bytes);
        let parent_id = store::create_document(
            &self.pool,
            &NewDocument {
                organization_id: request.organization_id.clone(),
                community_id: request.community_id.clone(),
                filename: request.filename.clone(),
                storage_path: request.storage_path.clone(),
                file_size: bytes.len() as i64,
                content_hash,
                processing_level: request.processing_level,
                parent_document_id: None,
            },
        )
        .await?;

        let mut failures = Vec::new();

        self.transition(&parent_id, Stage::Extraction, StageStatus::Processing)
            .await?;

        let analyzer = Analyzer::new(self.extractor(), self.client.clone(), MIN_FRAGMENT_CHARS);
        let report = match analyzer.analyze(bytes, &request.filename).await {
            Ok(report) => report,
            Err(e) => {
                let message = e.to_string();
                eprintln!(
                    "Warning: extraction failed for document {}: {}",
                    parent_id, message
                );
                self.transition(&parent_id, Stage::Extraction, StageStatus::Failed)
                    .await?;
                failures.push(StageFailure {
                    stage: Stage::Extraction.to_string(),
                    message,
                });
                let doc = self.require_document(&parent_id).await?;
                return Ok(UploadOutcome {
                    is_multi_document: false,
                    detected_documents: Vec::new(),
                    document: DocumentOutcome::from_document(&doc, failures),
                    children: Vec::new(),
                    extracted_text: String::new(),
                });
            }
        };

        store::store_extracted_text(
            &self.pool,
            &parent_id,
            &report.extracted_text,
            report.total_pages as i64,
        )
        .await?;
        self.transition(&parent_id, Stage::Extraction, StageStatus::Completed)
            .await?;

        if report.is_multi_document {
            let children = self.materialize_children(&parent_id, request, &report).await?;
            let doc = self.require_document(&parent_id).await?;
            return Ok(UploadOutcome {
                is_multi_document: true,
                detected_documents: report.detected_documents,
                document: DocumentOutcome::from_document(&doc, failures),
                children,
                extracted_text: report.extracted_text,
            });
        }

        failures.extend(self.run_pending_stages(&parent_id).await?);
        let doc = self.require_document(&parent_id).await?;
        Ok(UploadOutcome {
            is_multi_document: false,
            detected_documents: report.detected_documents,
            document: DocumentOutcome::from_document(&doc, failures),
            children: Vec::new(),
            extracted_text: report.extracted_text,
        })
    }

    /// Type the bundle parent, close out its remaining stages, and spawn
    /// one child per supported fragment.
    async fn materialize_children(
        &self,
        parent_id: &str,
        request: &UploadRequest,
        report: &crate::analyze::AnalysisReport,
    ) -> Result<Vec<DocumentOutcome>, PipelineError> {
        store::set_document_type(&self.pool, parent_id, DocumentType::Bundle).await?;
        store::insert_classification(
            &self.pool,
            parent_id,
            &ClassificationResult {
                document_type: DocumentType::Bundle,
                confidence: 1.0,
                method: "analyzer".to_string(),
                reasoning: format!(
                    "boundary detection found {} documents",
                    report.detected_documents.len()
                ),
                processing_ms: 0,
            },
        )
        .await?;

        // The parent is classified by the boundary analysis itself; its
        // content lives on through the children, so structured
        // extraction and chunking are inapplicable, not failed.
        let parent_state = store::load_state(&self.require_document(parent_id).await?);
        if parent_state.enabled(Stage::Classification) {
            self.transition(parent_id, Stage::Classification, StageStatus::Processing)
                .await?;
            self.transition(parent_id, Stage::Classification, StageStatus::Completed)
                .await?;
        }
        for stage in [Stage::Metadata, Stage::Chunking] {
            if parent_state.enabled(stage) {
                self.transition(parent_id, stage, StageStatus::Skipped)
                    .await?;
            }
        }

        let stem = file_stem(&request.filename);
        let mut outcomes = Vec::new();
        for (index, fragment) in report.detected_documents.iter().enumerate() {
            if !fragment.supported {
                eprintln!(
                    "Warning: fragment {} of {} has unsupported type '{}', not materialized",
                    index + 1,
                    request.filename,
                    fragment.document_type
                );
                continue;
            }

            let child_filename =
                format!("{}_fragment_{}_{}.txt", stem, index + 1, fragment.document_type);
            let child_id = store::create_document(
                &self.pool,
                &NewDocument {
                    organization_id: request.organization_id.clone(),
                    community_id: request.community_id.clone(),
                    filename: child_filename,
                    storage_path: None,
                    file_size: fragment.text.len() as i64,
                    content_hash: hex_digest(fragment.text.as_bytes()),
                    processing_level: request.processing_level,
                    parent_document_id: Some(parent_id.to_string()),
                },
            )
            .await?;

            // The fragment text is already extracted; the child enters
            // the pipeline at classification.
            self.transition(&child_id, Stage::Extraction, StageStatus::Processing)
                .await?;
            store::store_extracted_text(
                &self.pool,
                &child_id,
                &fragment.text,
                report.total_pages as i64,
            )
            .await?;
            self.transition(&child_id, Stage::Extraction, StageStatus::Completed)
                .await?;

            let failures = self.run_pending_stages(&child_id).await?;
            let doc = self.require_document(&child_id).await?;
            outcomes.push(DocumentOutcome::from_document(&doc, failures));

            if self.config.ai.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.ai.request_delay_ms)).await;
            }
        }

        Ok(outcomes)
    }

    /// Run every stage the state machine considers runnable, in order,
    /// stopping at the first failure or at the processing-level ceiling.
    pub async fn run_pending_stages(
        &self,
        document_id: &str,
    ) -> Result<Vec<StageFailure>, PipelineError> {
        let mut failures = Vec::new();

        loop {
            let doc = self.require_document(document_id).await?;
            let state = store::load_state(&doc);
            let Some(stage) = state.next_runnable() else {
                break;
            };

            self.transition(document_id, stage, StageStatus::Processing)
                .await?;

            match self.run_stage(&doc, stage).await {
                Ok(StageOutcome::Completed) => {
                    self.transition(document_id, stage, StageStatus::Completed)
                        .await?;
                }
                Ok(StageOutcome::Skipped) => {
                    self.transition(document_id, stage, StageStatus::Skipped)
                        .await?;
                }
                Err(message) => {
                    eprintln!(
                        "Warning: stage {} failed for document {}: {}",
                        stage, document_id, message
                    );
                    self.transition(document_id, stage, StageStatus::Failed)
                        .await?;
                    failures.push(StageFailure {
                        stage: stage.to_string(),
                        message,
                    });
                }
            }
        }

        Ok(failures)
    }

    /// Reset one failed stage to pending and resume automatic
    /// progression from there. Completed stages are never re-run.
    pub async fn retry_stage(
        &self,
        document_id: &str,
        stage: Stage,
    ) -> Result<Vec<StageFailure>, PipelineError> {
        let doc = self.require_document(document_id).await?;
        let mut state = store::load_state(&doc);
        state.reset_failed(stage)?;
        store::update_stage_status(&self.pool, document_id, stage, StageStatus::Pending).await?;
        self.run_pending_stages(document_id).await
    }

    async fn run_stage(&self, doc: &Document, stage: Stage) -> Result<StageOutcome, String> {
        match stage {
            Stage::Extraction => self.run_extraction(doc).await,
            Stage::Classification => self.run_classification(doc).await,
            Stage::Metadata => self.run_metadata(doc).await,
            Stage::Chunking => self.run_chunking(doc).await,
        }
    }

    /// Extraction outside the upload path, i.e. a manual re-run. Needs
    /// the original bytes back from disk.
    async fn run_extraction(&self, doc: &Document) -> Result<StageOutcome, String> {
        let path = doc
            .storage_path
            .as_deref()
            .ok_or_else(|| "original file was not retained, cannot re-extract".to_string())?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("failed to read {}: {}", path, e))?;

        let outcome = self
            .extractor()
            .extract(&bytes, &doc.filename, None)
            .await
            .map_err(|e| e.to_string())?;

        store::store_extracted_text(&self.pool, &doc.id, &outcome.text, outcome.page_count as i64)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StageOutcome::Completed)
    }

    async fn run_classification(&self, doc: &Document) -> Result<StageOutcome, String> {
        let text = doc
            .extracted_text
            .as_deref()
            .ok_or_else(|| "no extracted text to classify".to_string())?;

        let result = classify(
            &doc.filename,
            text,
            &self.config.classification,
            self.client.as_ref(),
        )
        .await;

        if result.confidence < self.config.classification.low_confidence {
            eprintln!(
                "Warning: low-confidence classification for document {}: {} ({:.2})",
                doc.id,
                result.document_type.as_str(),
                result.confidence
            );
        }

        store::insert_classification(&self.pool, &doc.id, &result)
            .await
            .map_err(|e| e.to_string())?;
        store::set_document_type(&self.pool, &doc.id, result.document_type)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StageOutcome::Completed)
    }

    async fn run_metadata(&self, doc: &Document) -> Result<StageOutcome, String> {
        let raw_type = doc
            .document_type
            .as_deref()
            .ok_or_else(|| "document has no type, classify first".to_string())?;
        let document_type = DocumentType::parse(raw_type)
            .ok_or_else(|| format!("unknown document type '{}'", raw_type))?;

        let Some(extractor) = extractor_for(document_type) else {
            // No structured schema for this type; nothing to extract.
            return Ok(StageOutcome::Skipped);
        };
        let table = ExtractedTable::for_type(document_type)
            .ok_or_else(|| format!("no table registered for type '{}'", raw_type))?;

        let text = doc
            .extracted_text
            .as_deref()
            .ok_or_else(|| "no extracted text for structured extraction".to_string())?;

        let data = extractor
            .process_metadata(&doc.id, text, self.client.as_ref())
            .await
            .map_err(|e| e.to_string())?;

        store::upsert_with_organization(&self.pool, table, &doc.id, &data)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StageOutcome::Completed)
    }

    async fn run_chunking(&self, doc: &Document) -> Result<StageOutcome, String> {
        if doc.document_type.as_deref() == Some(DocumentType::Bundle.as_str()) {
            return Ok(StageOutcome::Skipped);
        }
        let text = doc
            .extracted_text
            .as_deref()
            .ok_or_else(|| "no extracted text to chunk".to_string())?;

        let chunks = chunk_text(&doc.id, text, self.config.chunking.max_tokens);
        store::replace_chunks(&self.pool, &doc.id, &chunks)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StageOutcome::Completed)
    }

    async fn transition(
        &self,
        document_id: &str,
        stage: Stage,
        to: StageStatus,
    ) -> Result<(), PipelineError> {
        let doc = self.require_document(document_id).await?;
        let mut state = store::load_state(&doc);
        match to {
            StageStatus::Processing => state.begin(stage)?,
            StageStatus::Completed => state.complete(stage)?,
            StageStatus::Failed => state.fail(stage)?,
            StageStatus::Skipped => state.skip(stage)?,
            StageStatus::Pending => state.reset_failed(stage)?,
        }
        store::update_stage_status(&self.pool, document_id, stage, to).await?;
        Ok(())
    }

    async fn require_document(&self, id: &str) -> Result<Document, PipelineError> {
        store::get_document(&self.pool, id)
            .await?
            .ok_or_else(|| PipelineError::DocumentNotFound(id.to_string()))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

//! Core data models used throughout the ingestion pipeline.
//!
//! These types represent documents, classification results, and extracted
//! structured records as they flow from upload through the staged pipeline.

use serde::{Deserialize, Serialize};

/// Closed set of supported document types.
///
/// Wire strings are the Spanish labels used by the property-management
/// domain (`factura`, `acta`, ...). Parsing an out-of-set string yields
/// `None` — the pipeline never invents new types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Minutes,
    Invoice,
    Contract,
    DeliveryNote,
    Communication,
    PropertyDeed,
    Budget,
    /// Pseudo-type for an unsplit multi-document upload.
    Bundle,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Minutes => "acta",
            DocumentType::Invoice => "factura",
            DocumentType::Contract => "contrato",
            DocumentType::DeliveryNote => "albaran",
            DocumentType::Communication => "comunicado",
            DocumentType::PropertyDeed => "escritura",
            DocumentType::Budget => "presupuesto",
            DocumentType::Bundle => "multidocumento",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "acta" => Some(DocumentType::Minutes),
            "factura" => Some(DocumentType::Invoice),
            "contrato" => Some(DocumentType::Contract),
            "albaran" | "albarán" => Some(DocumentType::DeliveryNote),
            "comunicado" => Some(DocumentType::Communication),
            "escritura" => Some(DocumentType::PropertyDeed),
            "presupuesto" => Some(DocumentType::Budget),
            "multidocumento" => Some(DocumentType::Bundle),
            _ => None,
        }
    }

    /// All concrete (non-bundle) types, in a stable order.
    pub fn concrete_types() -> &'static [DocumentType] {
        &[
            DocumentType::Minutes,
            DocumentType::Invoice,
            DocumentType::Contract,
            DocumentType::DeliveryNote,
            DocumentType::Communication,
            DocumentType::PropertyDeed,
            DocumentType::Budget,
        ]
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "processing" => Some(StageStatus::Processing),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            "skipped" => Some(StageStatus::Skipped),
            _ => None,
        }
    }

    /// A stage in this status satisfies the gate for subsequent stages.
    pub fn satisfies_gate(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Classification,
    Metadata,
    Chunking,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Extraction,
        Stage::Classification,
        Stage::Metadata,
        Stage::Chunking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Classification => "classification",
            Stage::Metadata => "metadata",
            Stage::Chunking => "chunking",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extraction" => Some(Stage::Extraction),
            "classification" => Some(Stage::Classification),
            "metadata" => Some(Stage::Metadata),
            "chunking" => Some(Stage::Chunking),
            _ => None,
        }
    }

    /// Processing level at which this stage becomes enabled (1–4).
    pub fn level(&self) -> i64 {
        match self {
            Stage::Extraction => 1,
            Stage::Classification => 2,
            Stage::Metadata => 3,
            Stage::Chunking => 4,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded or derived document, as stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub organization_id: String,
    pub community_id: Option<String>,
    pub filename: String,
    pub storage_path: Option<String>,
    pub file_size: i64,
    pub content_hash: String,
    pub document_type: Option<String>,
    pub extracted_text: Option<String>,
    pub text_length: i64,
    pub page_count: i64,
    pub processing_level: i64,
    pub parent_document_id: Option<String>,
    pub extraction_status: String,
    pub classification_status: String,
    pub metadata_status: String,
    pub chunking_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A logical sub-document detected inside a multi-document bundle.
///
/// Ephemeral: produced by the analyzer and consumed immediately to
/// materialize child documents. Never persisted on its own.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedSubDocument {
    /// Raw type guess from the boundary detector (may be out-of-set).
    pub document_type: String,
    /// Whether a registered extractor exists for this type.
    pub supported: bool,
    pub suggested_title: String,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(skip)]
    pub text: String,
}

/// Outcome of classifying one document.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub document_type: DocumentType,
    /// 0.0–1.0; low values are flagged for manual review downstream.
    pub confidence: f64,
    /// `filename`, `ai`, or `default`.
    pub method: String,
    pub reasoning: String,
    pub processing_ms: u64,
}

/// Structured fields extracted from one document.
///
/// Common queryable columns (date, amount, counterparty) are typed;
/// everything else lives in the free-form `fields` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedData {
    pub doc_date: Option<String>,
    pub amount: Option<f64>,
    pub counterparty: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.doc_date.is_none()
            && self.amount.is_none()
            && self.counterparty.is_none()
            && self.fields.is_empty()
    }
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

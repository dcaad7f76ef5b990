//! Document classifier.
//!
//! Assigns a [`DocumentType`] to a text fragment. Filename keyword
//! matching runs first (cheap and deterministic); the AI content
//! classifier is the fallback, and when it is disabled or fails the
//! result degrades to a low-confidence default rather than an error —
//! classification never blocks extraction from being attempted, but the
//! low confidence is recorded so the document can be flagged for review.

use std::time::Instant;

use crate::ai::{parse_json_response, AiClient};
use crate::config::ClassificationConfig;
use crate::models::{ClassificationResult, DocumentType};

/// Filename keywords per type. First hit wins, checked in declaration
/// order, so the more specific labels come first.
const FILENAME_KEYWORDS: &[(&str, DocumentType)] = &[
    ("acta", DocumentType::Minutes),
    ("factura", DocumentType::Invoice),
    ("invoice", DocumentType::Invoice),
    ("contrato", DocumentType::Contract),
    ("contract", DocumentType::Contract),
    ("albaran", DocumentType::DeliveryNote),
    ("albarán", DocumentType::DeliveryNote),
    ("comunicado", DocumentType::Communication),
    ("circular", DocumentType::Communication),
    ("escritura", DocumentType::PropertyDeed),
    ("presupuesto", DocumentType::Budget),
];

/// Confidence assigned to an exact filename keyword hit.
const FILENAME_CONFIDENCE: f64 = 0.95;
/// Confidence of the fallback default when no signal is available.
const DEFAULT_CONFIDENCE: f64 = 0.2;

/// Deterministic filename pass. Public so the analyzer can reuse it for
/// fragment-title hints.
pub fn classify_by_filename(filename: &str) -> Option<DocumentType> {
    let lower = filename.to_lowercase();
    FILENAME_KEYWORDS
        .iter()
        .find(|(kw, _)| lower.contains(kw))
        .map(|(_, ty)| *ty)
}

const CLASSIFY_SYSTEM: &str = "You classify property-management documents. \
Answer with a JSON object: {\"document_type\": <one of acta, factura, contrato, \
albaran, comunicado, escritura, presupuesto>, \"confidence\": <0.0-1.0>, \
\"reasoning\": <one short sentence>}. Never invent types outside that list.";

/// Truncation applied to the classification prompt; the opening of a
/// document is what identifies its type.
const MAX_CLASSIFY_CHARS: usize = 4000;

/// Classify one document. Infallible by design: the worst outcome is a
/// low-confidence default.
pub async fn classify(
    filename: &str,
    text: &str,
    config: &ClassificationConfig,
    client: &dyn AiClient,
) -> ClassificationResult {
    let started = Instant::now();

    // Filename heuristic first; on a hit the AI is never invoked.
    if let Some(ty) = classify_by_filename(filename) {
        return ClassificationResult {
            document_type: ty,
            confidence: FILENAME_CONFIDENCE,
            method: "filename".to_string(),
            reasoning: format!("filename '{}' matches keyword for {}", filename, ty),
            processing_ms: started.elapsed().as_millis() as u64,
        };
    }

    if config.use_ai {
        match classify_with_ai(text, client).await {
            Ok((ty, confidence, reasoning)) => {
                return ClassificationResult {
                    document_type: ty,
                    confidence,
                    method: "ai".to_string(),
                    reasoning,
                    processing_ms: started.elapsed().as_millis() as u64,
                };
            }
            Err(e) => {
                eprintln!("Warning: AI classification failed: {}", e);
            }
        }
    }

    ClassificationResult {
        document_type: DocumentType::Communication,
        confidence: DEFAULT_CONFIDENCE,
        method: "default".to_string(),
        reasoning: "no filename signal and AI classification unavailable".to_string(),
        processing_ms: started.elapsed().as_millis() as u64,
    }
}

async fn classify_with_ai(
    text: &str,
    client: &dyn AiClient,
) -> anyhow::Result<(DocumentType, f64, String)> {
    let excerpt: String = text.chars().take(MAX_CLASSIFY_CHARS).collect();
    let answer = client.complete(CLASSIFY_SYSTEM, &excerpt).await?;
    let json = parse_json_response(&answer)?;

    let type_str = json
        .get("document_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("classification response missing document_type"))?;

    // Out-of-set answers are rejected, not silently adopted.
    let ty = DocumentType::parse(type_str)
        .filter(|t| *t != DocumentType::Bundle)
        .ok_or_else(|| anyhow::anyhow!("classifier returned out-of-set type '{}'", type_str))?;

    let confidence = json
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let reasoning = json
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok((ty, confidence, reasoning))
}

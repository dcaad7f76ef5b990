//! Multi-document analyzer.
//!
//! Detects whether one uploaded file bundles several logical documents.
//! Runs the extraction cascade once, then asks the AI to propose
//! fragment boundaries over the combined text. Boundary-detection
//! failure on an otherwise good extraction degrades to treating the
//! whole file as a single document rather than aborting.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ai::{parse_json_response, AiClient};
use crate::classify::classify_by_filename;
use crate::extract::{ExtractError, ExtractionMethod, TextExtractor};
use crate::extractors::is_supported_type;
use crate::models::DetectedSubDocument;

/// Outcome of analyzing one uploaded file.
#[derive(Debug, serde::Serialize)]
pub struct AnalysisReport {
    pub is_multi_document: bool,
    pub detected_documents: Vec<DetectedSubDocument>,
    /// Full extracted text; fragments index into this by char offset.
    #[serde(skip)]
    pub extracted_text: String,
    pub total_pages: usize,
    pub extraction_method: ExtractionMethod,
}

/// Files written by [`Analyzer::separate`].
#[derive(Debug, serde::Serialize)]
pub struct SeparationResult {
    pub output_files: Vec<PathBuf>,
}

const BOUNDARY_SYSTEM: &str = "You segment Spanish property-management document bundles. \
Given the full extracted text of one uploaded file, decide whether it contains multiple \
unrelated logical documents. Return a JSON object: {\"is_multi_document\": <bool>, \
\"documents\": [{\"document_type\": <one of acta, factura, contrato, albaran, comunicado, \
escritura, presupuesto, or other>, \"title\": <short human title>, \
\"start_offset\": <character offset>, \"end_offset\": <character offset>}]}. \
Offsets index characters of the given text. Return only JSON.";

pub struct Analyzer {
    extractor: TextExtractor,
    client: Arc<dyn AiClient>,
    /// Fragments shorter than this are dropped as trivial.
    min_fragment_len: usize,
}

impl Analyzer {
    pub fn new(extractor: TextExtractor, client: Arc<dyn AiClient>, min_fragment_len: usize) -> Self {
        Self {
            extractor,
            client,
            min_fragment_len,
        }
    }

    /// Extract once, then propose per-document boundaries.
    pub async fn analyze(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<AnalysisReport, ExtractError> {
        let outcome = self.extractor.extract(bytes, filename, None).await?;

        let detected = match self.propose_boundaries(&outcome.text).await {
            Ok(fragments) => fragments,
            Err(e) => {
                eprintln!(
                    "Warning: boundary detection failed for '{}': {}; treating as single document",
                    filename, e
                );
                Vec::new()
            }
        };

        let detected = sanitize_fragments(&outcome.text, detected, self.min_fragment_len);

        // A bundle with fewer than two usable fragments is the ordinary
        // single-document case.
        if detected.len() < 2 {
            return Ok(AnalysisReport {
                is_multi_document: false,
                detected_documents: vec![whole_file_fragment(&outcome.text, filename)],
                extracted_text: outcome.text,
                total_pages: outcome.page_count,
                extraction_method: outcome.method,
            });
        }

        Ok(AnalysisReport {
            is_multi_document: true,
            detected_documents: detected,
            extracted_text: outcome.text,
            total_pages: outcome.page_count,
            extraction_method: outcome.method,
        })
    }

    async fn propose_boundaries(&self, text: &str) -> Result<Vec<RawFragment>> {
        let answer = self.client.complete(BOUNDARY_SYSTEM, text).await?;
        let json = parse_json_response(&answer)?;

        let documents = json
            .get("documents")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow::anyhow!("boundary response missing documents array"))?;

        let mut fragments = Vec::with_capacity(documents.len());
        for doc in documents {
            let document_type = doc
                .get("document_type")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let title = doc
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let start = doc
                .get("start_offset")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let end = doc.get("end_offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            fragments.push(RawFragment {
                document_type,
                title,
                start,
                end,
            });
        }
        Ok(fragments)
    }

    /// Slice the already-extracted text at the proposed boundaries and
    /// write one file per fragment. Unsupported types are written too,
    /// for visibility; they are just never materialized as documents.
    pub fn separate(
        &self,
        text: &str,
        filename: &str,
        detected: &[DetectedSubDocument],
        output_dir: &Path,
    ) -> Result<SeparationResult> {
        std::fs::create_dir_all(output_dir)?;
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");

        let mut output_files = Vec::with_capacity(detected.len());
        for (index, fragment) in detected.iter().enumerate() {
            let label = if fragment.document_type.is_empty() {
                "desconocido"
            } else {
                &fragment.document_type
            };
            let path = output_dir.join(format!("{}_fragment_{}_{}.txt", stem, index + 1, label));
            let content = if fragment.text.is_empty() {
                slice_chars(text, fragment.start_offset, fragment.end_offset)
            } else {
                fragment.text.clone()
            };
            std::fs::write(&path, content)?;
            output_files.push(path);
        }

        Ok(SeparationResult { output_files })
    }
}

struct RawFragment {
    document_type: String,
    title: String,
    start: usize,
    end: usize,
}

/// Character-offset slice that never panics on boundary mismatches.
fn slice_chars(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Clamp, order, and drop trivial fragments; fill in fragment text and
/// the supported flag.
fn sanitize_fragments(
    text: &str,
    mut raw: Vec<RawFragment>,
    min_len: usize,
) -> Vec<DetectedSubDocument> {
    let total_chars = text.chars().count();
    raw.sort_by_key(|f| f.start);

    let mut out = Vec::with_capacity(raw.len());
    for fragment in raw {
        let start = fragment.start.min(total_chars);
        let end = fragment.end.min(total_chars);
        if end <= start {
            continue;
        }
        let slice = slice_chars(text, start, end);
        if slice.trim().len() < min_len {
            continue;
        }
        let supported = is_supported_type(&fragment.document_type);
        let title = if fragment.title.is_empty() {
            format!("Documento {}", out.len() + 1)
        } else {
            fragment.title
        };
        out.push(DetectedSubDocument {
            document_type: fragment.document_type,
            supported,
            suggested_title: title,
            start_offset: start,
            end_offset: end,
            text: slice,
        });
    }
    out
}

/// Single-document fallback fragment spanning the whole text.
fn whole_file_fragment(text: &str, filename: &str) -> DetectedSubDocument {
    let type_guess = classify_by_filename(filename)
        .map(|t| t.as_str().to_string())
        .unwrap_or_default();
    let supported = is_supported_type(&type_guess);
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    DetectedSubDocument {
        document_type: type_guess,
        supported,
        suggested_title: stem.to_string(),
        start_offset: 0,
        end_offset: text.chars().count(),
        text: text.to_string(),
    }
}

//! Type-specific structured-data extractors.
//!
//! Each supported [`DocumentType`] has one stateless extractor behind the
//! shared [`Extractor`] trait. The factory [`extractor_for`] is a pure
//! lookup over the closed type set: requesting an unsupported type
//! returns `None`, which callers treat as a terminal, non-retryable
//! condition (stage `skipped`, not `failed`).
//!
//! Every extractor issues one AI structured-extraction call with a
//! type-specific schema prompt. A malformed response is retried with a
//! local regex fallback ([`fields`]) so partial value is preserved; only
//! when both yield nothing does the stage fail.

pub mod fields;

mod budget;
mod communication;
mod contract;
mod deed;
mod delivery_note;
mod invoice;
mod minutes;

pub use budget::BudgetExtractor;
pub use communication::CommunicationExtractor;
pub use contract::ContractExtractor;
pub use deed::DeedExtractor;
pub use delivery_note::DeliveryNoteExtractor;
pub use invoice::InvoiceExtractor;
pub use minutes::MinutesExtractor;

use async_trait::async_trait;

use crate::ai::{parse_json_response, AiClient};
use crate::models::{DocumentType, ExtractedData};

/// Structured extraction failed for one document.
#[derive(Debug)]
pub enum ExtractorError {
    /// Neither the AI call nor the local fallback produced any field.
    NoFields { document_type: DocumentType },
}

impl std::fmt::Display for ExtractorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorError::NoFields { document_type } => write!(
                f,
                "structured extraction for {} produced no fields",
                document_type
            ),
        }
    }
}

impl std::error::Error for ExtractorError {}

/// Truncation applied to extraction prompts.
const MAX_EXTRACT_CHARS: usize = 12_000;

/// Shared capability of all type extractors. Stateless with respect to
/// the document: all state lives in the returned [`ExtractedData`].
#[async_trait]
pub trait Extractor: Send + Sync {
    fn document_type(&self) -> DocumentType;

    /// Type-specific system prompt describing the JSON schema to return.
    fn schema_prompt(&self) -> &'static str;

    /// Local regex fallback used when the AI output is unusable.
    fn fallback(&self, text: &str) -> ExtractedData;

    /// One structured-extraction call, then the local fallback.
    async fn process_metadata(
        &self,
        document_id: &str,
        text: &str,
        client: &dyn AiClient,
    ) -> Result<ExtractedData, ExtractorError> {
        let excerpt: String = text.chars().take(MAX_EXTRACT_CHARS).collect();

        match client.complete(self.schema_prompt(), &excerpt).await {
            Ok(answer) => match parse_json_response(&answer) {
                Ok(json) => {
                    let data = payload_from_json(&json);
                    if !data.is_empty() {
                        return Ok(data);
                    }
                    eprintln!(
                        "Warning: empty structured payload for document {}, using local fallback",
                        document_id
                    );
                }
                Err(e) => {
                    eprintln!(
                        "Warning: malformed structured output for document {}: {}, using local fallback",
                        document_id, e
                    );
                }
            },
            Err(e) => {
                eprintln!(
                    "Warning: structured extraction call failed for document {}: {}, using local fallback",
                    document_id, e
                );
            }
        }

        let data = self.fallback(text);
        if data.is_empty() {
            Err(ExtractorError::NoFields {
                document_type: self.document_type(),
            })
        } else {
            Ok(data)
        }
    }
}

static MINUTES: MinutesExtractor = MinutesExtractor;
static INVOICE: InvoiceExtractor = InvoiceExtractor;
static CONTRACT: ContractExtractor = ContractExtractor;
static DELIVERY_NOTE: DeliveryNoteExtractor = DeliveryNoteExtractor;
static COMMUNICATION: CommunicationExtractor = CommunicationExtractor;
static DEED: DeedExtractor = DeedExtractor;
static BUDGET: BudgetExtractor = BudgetExtractor;

/// Pure lookup table keyed by the closed type set. `Bundle` has no
/// extractor by design.
pub fn extractor_for(document_type: DocumentType) -> Option<&'static dyn Extractor> {
    match document_type {
        DocumentType::Minutes => Some(&MINUTES),
        DocumentType::Invoice => Some(&INVOICE),
        DocumentType::Contract => Some(&CONTRACT),
        DocumentType::DeliveryNote => Some(&DELIVERY_NOTE),
        DocumentType::Communication => Some(&COMMUNICATION),
        DocumentType::PropertyDeed => Some(&DEED),
        DocumentType::Budget => Some(&BUDGET),
        DocumentType::Bundle => None,
    }
}

/// Whether a raw type string names a pipeline-supported type.
pub fn is_supported_type(raw: &str) -> bool {
    DocumentType::parse(raw)
        .map(|ty| extractor_for(ty).is_some())
        .unwrap_or(false)
}

/// Fold a structured-extraction JSON answer into [`ExtractedData`].
///
/// Recognizes the uniform envelope (`doc_date`, `amount`,
/// `counterparty`, `fields`) and folds any other top-level keys into
/// the free-form field map, so slightly off-schema answers still
/// contribute.
fn payload_from_json(json: &serde_json::Value) -> ExtractedData {
    let mut data = ExtractedData::default();
    let obj = match json.as_object() {
        Some(o) => o,
        None => return data,
    };

    for (key, value) in obj {
        match key.as_str() {
            "doc_date" => {
                data.doc_date = value.as_str().map(|s| s.to_string());
            }
            "amount" => {
                data.amount = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.replace(',', ".").parse().ok()));
            }
            "counterparty" => {
                data.counterparty = value.as_str().map(|s| s.to_string());
            }
            "fields" => {
                if let Some(map) = value.as_object() {
                    for (k, v) in map {
                        if !v.is_null() {
                            data.fields.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            _ => {
                if !value.is_null() {
                    data.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    data
}

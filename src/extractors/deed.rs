use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for property deeds (`escritura`).
pub struct DeedExtractor;

const PROMPT: &str = "Extract structured data from this Spanish property deed (escritura). \
Return a JSON object: {\"doc_date\": <execution date, YYYY-MM-DD>, \"amount\": <declared value as number>, \
\"counterparty\": <acquiring party>, \"fields\": {\"notary\": ..., \"protocol_number\": ..., \
\"property_address\": ..., \"registry\": ..., \"transferor\": ...}}. \
Use null for any field not present. Return only JSON.";

impl Extractor for DeedExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::PropertyDeed
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            amount: fields::find_amount(text),
            ..Default::default()
        };
        if let Some(notary) = fields::find_labeled_value(text, &["notario"]) {
            data.fields.insert("notary".to_string(), notary.into());
        }
        if let Some(protocol) = fields::find_labeled_value(text, &["protocolo"]) {
            data.fields
                .insert("protocol_number".to_string(), protocol.into());
        }
        data
    }
}

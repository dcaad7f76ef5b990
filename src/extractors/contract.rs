use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for service contracts (`contrato`).
pub struct ContractExtractor;

const PROMPT: &str = "Extract structured data from this Spanish service contract. \
Return a JSON object: {\"doc_date\": <signing date, YYYY-MM-DD>, \"amount\": <contract amount as number>, \
\"counterparty\": <the contracted provider>, \"fields\": {\"client\": <the contracting party>, \
\"service\": <service description>, \"duration\": ..., \"renewal\": ..., \"termination_notice\": ...}}. \
Use null for any field not present. Return only JSON.";

impl Extractor for ContractExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::Contract
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    /// The contract fallback must at least recover the counterparty
    /// names from the preamble.
    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            amount: fields::find_amount(text),
            ..Default::default()
        };
        if let Some((client, provider)) = fields::find_parties(text) {
            data.counterparty = Some(provider);
            data.fields.insert("client".to_string(), client.into());
        }
        data
    }
}

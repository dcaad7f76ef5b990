use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for supplier invoices (`factura`).
pub struct InvoiceExtractor;

const PROMPT: &str = "Extract structured data from this Spanish supplier invoice. \
Return a JSON object: {\"doc_date\": <issue date, YYYY-MM-DD>, \"amount\": <total amount as number>, \
\"counterparty\": <supplier name>, \"fields\": {\"invoice_number\": ..., \"tax_id\": ..., \
\"tax_rate\": ..., \"base_amount\": ..., \"concept\": ..., \"due_date\": ...}}. \
Use null for any field not present. Return only JSON.";

impl Extractor for InvoiceExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::Invoice
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            amount: fields::find_amount(text),
            counterparty: fields::find_labeled_value(text, &["proveedor", "emisor"]),
            ..Default::default()
        };
        if let Some(number) = fields::find_invoice_number(text) {
            data.fields
                .insert("invoice_number".to_string(), number.into());
        }
        if let Some(cif) = fields::find_labeled_value(text, &["cif", "nif"]) {
            data.fields.insert("tax_id".to_string(), cif.into());
        }
        data
    }
}

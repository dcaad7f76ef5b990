use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for delivery notes (`albarán`).
pub struct DeliveryNoteExtractor;

const PROMPT: &str = "Extract structured data from this Spanish delivery note (albarán). \
Return a JSON object: {\"doc_date\": <delivery date, YYYY-MM-DD>, \"counterparty\": <supplier name>, \
\"fields\": {\"delivery_note_number\": ..., \"order_reference\": ..., \
\"items\": [{\"description\": ..., \"quantity\": ...}], \"received_by\": ...}}. \
Use null for any field not present. Return only JSON.";

impl Extractor for DeliveryNoteExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::DeliveryNote
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            counterparty: fields::find_labeled_value(text, &["proveedor", "remitente"]),
            ..Default::default()
        };
        if let Some(number) = fields::find_labeled_value(text, &["albarán nº", "albaran nº", "albarán num", "albaran num"]) {
            data.fields
                .insert("delivery_note_number".to_string(), number.into());
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_pulls_supplier_and_date() {
        let text = "ALBARÁN Nº: 5531\nProveedor: Suministros Rivera SA\nFecha: 22/05/2024";
        let data = DeliveryNoteExtractor.fallback(text);
        assert_eq!(data.counterparty.as_deref(), Some("Suministros Rivera SA"));
        assert_eq!(data.doc_date.as_deref(), Some("2024-05-22"));
    }
}

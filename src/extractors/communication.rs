use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for resident communications and circulars (`comunicado`).
pub struct CommunicationExtractor;

const PROMPT: &str = "Extract structured data from this Spanish community communication or circular. \
Return a JSON object: {\"doc_date\": <date, YYYY-MM-DD>, \"counterparty\": <sender>, \
\"fields\": {\"subject\": ..., \"audience\": ..., \"summary\": <one or two sentences>, \
\"action_required\": <true|false>}}. Use null for any field not present. Return only JSON.";

impl Extractor for CommunicationExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::Communication
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            counterparty: fields::find_labeled_value(text, &["remitente", "administrador"]),
            ..Default::default()
        };
        if let Some(subject) = fields::find_labeled_value(text, &["asunto"]) {
            data.fields.insert("subject".to_string(), subject.into());
        } else {
            // First non-empty line is usually the heading.
            if let Some(heading) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
                data.fields
                    .insert("subject".to_string(), heading.to_string().into());
            }
        }
        data
    }
}

use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for meeting minutes (`acta`) of owners' assemblies.
pub struct MinutesExtractor;

const PROMPT: &str = "Extract structured data from these Spanish community meeting minutes (acta). \
Return a JSON object: {\"doc_date\": <meeting date, YYYY-MM-DD>, \"counterparty\": <community name>, \
\"fields\": {\"meeting_type\": <ordinaria|extraordinaria>, \"president\": ..., \"administrator\": ..., \
\"agreements\": [<short summary per agreement>], \"attendee_count\": ...}}. \
Use null for any field not present. Return only JSON.";

impl Extractor for MinutesExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::Minutes
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            counterparty: fields::find_labeled_value(text, &["comunidad de propietarios", "comunidad"]),
            ..Default::default()
        };
        let lower = text.to_lowercase();
        if lower.contains("extraordinaria") {
            data.fields
                .insert("meeting_type".to_string(), "extraordinaria".into());
        } else if lower.contains("ordinaria") {
            data.fields
                .insert("meeting_type".to_string(), "ordinaria".into());
        }
        if let Some(president) = fields::find_labeled_value(text, &["presidente"]) {
            data.fields.insert("president".to_string(), president.into());
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_detects_meeting_type_and_date() {
        let text = "ACTA de la Junta General Extraordinaria celebrada el 4 de junio de 2024.\n\
                    Presidente: D. Luis Ortega";
        let data = MinutesExtractor.fallback(text);
        assert_eq!(data.doc_date.as_deref(), Some("2024-06-04"));
        assert_eq!(data.fields["meeting_type"], "extraordinaria");
        assert_eq!(data.fields["president"], "D. Luis Ortega");
    }
}

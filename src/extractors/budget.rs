use crate::extractors::{fields, Extractor};
use crate::models::{DocumentType, ExtractedData};

/// Extractor for budgets and quotes (`presupuesto`).
pub struct BudgetExtractor;

const PROMPT: &str = "Extract structured data from this Spanish budget or quote (presupuesto). \
Return a JSON object: {\"doc_date\": <date, YYYY-MM-DD>, \"amount\": <total as number>, \
\"counterparty\": <issuing company>, \"fields\": {\"budget_number\": ..., \"validity\": ..., \
\"line_items\": [{\"description\": ..., \"amount\": ...}], \"accepted\": <true|false|null>}}. \
Use null for any field not present. Return only JSON.";

impl Extractor for BudgetExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::Budget
    }

    fn schema_prompt(&self) -> &'static str {
        PROMPT
    }

    fn fallback(&self, text: &str) -> ExtractedData {
        let mut data = ExtractedData {
            doc_date: fields::find_date(text),
            amount: fields::find_amount(text),
            counterparty: fields::find_labeled_value(text, &["empresa", "emisor"]),
            ..Default::default()
        };
        if let Some(number) = fields::find_labeled_value(text, &["presupuesto nº", "nº presupuesto"]) {
            data.fields
                .insert("budget_number".to_string(), number.into());
        }
        data
    }
}

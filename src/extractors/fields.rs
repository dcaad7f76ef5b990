//! Regex-based field pulls shared by the extractor fallbacks.
//!
//! When the AI structured-extraction call returns malformed output, each
//! extractor retries with these local heuristics so a partial record is
//! preserved instead of an all-or-nothing failure. Dates are normalized
//! to ISO `YYYY-MM-DD`; amounts use the Spanish thousands/decimal
//! convention (`1.250,40`).

use regex::Regex;
use std::sync::OnceLock;

fn numeric_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4})\b").expect("valid regex")
    })
}

fn spanish_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d{1,2})\s+de\s+(enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre)\s+de\s+(\d{4})\b",
        )
        .expect("valid regex")
    })
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 1.250,40 € / EUR 1250,40 / importe: 1250.40
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3}(?:\.\d{3})*(?:,\d{1,2})|\d+(?:[.,]\d{1,2})?)\s*(?:€|eur|euros)")
            .expect("valid regex")
    })
}

fn labeled_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:importe(?:\s+total)?|total(?:\s+factura)?|presupuesto)\s*:?\s*(\d{1,3}(?:\.\d{3})*(?:,\d{1,2})?|\d+(?:[.,]\d{1,2})?)",
        )
        .expect("valid regex")
    })
}

fn month_number(name: &str) -> Option<u32> {
    let n = match name.to_lowercase().as_str() {
        "enero" => 1,
        "febrero" => 2,
        "marzo" => 3,
        "abril" => 4,
        "mayo" => 5,
        "junio" => 6,
        "julio" => 7,
        "agosto" => 8,
        "septiembre" => 9,
        "octubre" => 10,
        "noviembre" => 11,
        "diciembre" => 12,
        _ => return None,
    };
    Some(n)
}

/// First recognizable date in the text, as ISO `YYYY-MM-DD`.
pub fn find_date(text: &str) -> Option<String> {
    if let Some(caps) = numeric_date_re().captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        if (1..=31).contains(&day) && (1..=12).contains(&month) {
            return Some(format!("{:04}-{:02}-{:02}", year, month, day));
        }
    }
    if let Some(caps) = spanish_date_re().captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        return Some(format!("{:04}-{:02}-{:02}", year, month, day));
    }
    None
}

/// Parse a Spanish-formatted number (`1.250,40`) into a float.
fn parse_spanish_number(s: &str) -> Option<f64> {
    let normalized = if s.contains(',') {
        s.replace('.', "").replace(',', ".")
    } else {
        s.to_string()
    };
    normalized.parse().ok()
}

/// First monetary amount in the text. Labeled amounts (`importe total:`)
/// take precedence over bare currency matches.
pub fn find_amount(text: &str) -> Option<f64> {
    if let Some(caps) = labeled_amount_re().captures(text) {
        if let Some(v) = parse_spanish_number(&caps[1]) {
            return Some(v);
        }
    }
    amount_re()
        .captures(&text.to_lowercase())
        .and_then(|caps| parse_spanish_number(&caps[1]))
}

/// Value following a `label: value` line for any of the given labels.
pub fn find_labeled_value(text: &str, labels: &[&str]) -> Option<String> {
    for line in text.lines() {
        let lower = line.to_lowercase();
        for label in labels {
            if let Some(pos) = lower.find(label) {
                // Lowercasing can shift byte offsets for unusual chars;
                // fall through rather than slice mid-character.
                let Some(after) = line.get(pos + label.len()..) else {
                    continue;
                };
                let value = after.trim_start_matches([':', ' ', '\t']).trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn between_parties_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "entre <party> y <party>" — contract preambles.
    RE.get_or_init(|| {
        Regex::new(r"(?i)entre\s+(.{3,80}?)\s+y\s+(.{3,80}?)[,.\n]").expect("valid regex")
    })
}

/// Contracting parties from a contract preamble ("entre A y B").
pub fn find_parties(text: &str) -> Option<(String, String)> {
    between_parties_re()
        .captures(text)
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
}

fn invoice_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)factura\s*(?:n[ºo°.]*\s*)?:?\s*([A-Z0-9][A-Z0-9\-/]{1,24})")
            .expect("valid regex")
    })
}

/// Invoice/document reference number.
pub fn find_invoice_number(text: &str) -> Option<String> {
    invoice_number_re()
        .captures(text)
        .map(|caps| caps[1].to_string())
}

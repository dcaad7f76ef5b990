//! Paragraph-boundary chunker for the final pipeline stage.
//!
//! Splits a document's extracted text into [`Chunk`]s bounded by a
//! configurable `max_tokens`, preferring paragraph boundaries (`\n\n`)
//! so each chunk stays semantically coherent. Each chunk carries a
//! SHA-256 hash of its text for staleness detection on re-runs.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split extracted text into chunks with contiguous indices from 0.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buffer = String::new();

    let mut flush = |buffer: &mut String, chunks: &mut Vec<Chunk>| {
        if !buffer.is_empty() {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(document_id, index, buffer));
            buffer.clear();
        }
    };

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buffer.is_empty() {
            para.len()
        } else {
            buffer.len() + 2 + para.len()
        };
        if joined_len > max_chars {
            flush(&mut buffer, &mut chunks);
        }

        if para.len() > max_chars {
            // Oversized paragraph: hard-split, preferring whitespace.
            flush(&mut buffer, &mut chunks);
            let mut remaining = para;
            while !remaining.is_empty() {
                let cut = split_point(remaining, max_chars);
                let index = chunks.len() as i64;
                chunks.push(make_chunk(document_id, index, remaining[..cut].trim()));
                remaining = &remaining[cut..];
            }
        } else {
            if !buffer.is_empty() {
                buffer.push_str("\n\n");
            }
            buffer.push_str(para);
        }
    }
    flush(&mut buffer, &mut chunks);

    // Guarantee at least one chunk so every document is addressable.
    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Byte index to cut at: a newline or space boundary within `max_chars`
/// when one exists, otherwise the nearest char boundary at or below it.
fn split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }
    let mut limit = max_chars;
    while !s.is_char_boundary(limit) {
        limit -= 1;
    }
    s[..limit]
        .rfind('\n')
        .or_else(|| s[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

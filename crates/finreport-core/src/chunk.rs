//! Text and table chunkers.
//!
//! Prose is split on paragraph boundaries (`\n\n`); spreadsheet grids are
//! split on row boundaries with the header row repeated at the top of every
//! chunk so each fragment is self-describing. Both respect a `max_tokens`
//! limit converted at 4 chars/token.
//!
//! Each chunk receives a fresh UUID and a SHA-256 hash of its text.
//!
//! ```rust
//! use finreport_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::analysis::grid::{is_blank_row, render_row, Grid};
use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// Indices are contiguous from 0. Empty or whitespace-only text produces
/// no chunks. Oversized paragraphs are hard-split at the last newline or
/// space before the limit.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    if text.trim().is_empty() {
        return Vec::new();
    }

    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut chunk_index: i64 = 0;

    for para in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(make_chunk(document_id, chunk_index, &current_buf));
            chunk_index += 1;
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                chunks.push(make_chunk(document_id, chunk_index, &current_buf));
                chunk_index += 1;
                current_buf.clear();
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
                let split_at = if split_at == 0 && !remaining.is_empty() {
                    remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len())
                } else {
                    split_at
                };
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let actual_split = snap_to_char_boundary(remaining, actual_split);
                let actual_split = if actual_split == 0 && !remaining.is_empty() {
                    remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len())
                } else {
                    actual_split
                };
                let piece = &remaining[..actual_split];
                if !piece.trim().is_empty() {
                    chunks.push(make_chunk(document_id, chunk_index, piece.trim()));
                    chunk_index += 1;
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(make_chunk(document_id, chunk_index, &current_buf));
    }

    chunks
}

/// Split a grid into row-aligned chunks.
///
/// Rows above `header_row` (titles, units) form a preamble at the top of
/// the first chunk. Every chunk starts with the rendered header row. A
/// single row longer than the limit still gets its own chunk.
pub fn chunk_table(
    document_id: &str,
    grid: &Grid,
    header_row: usize,
    max_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let rows = grid.rows();
    if grid.is_empty() {
        return Vec::new();
    }
    let header_row = header_row.min(rows.len().saturating_sub(1));

    let preamble: Vec<String> = rows[..header_row]
        .iter()
        .filter(|r| !is_blank_row(r))
        .map(|r| render_row(r))
        .collect();
    let header = render_row(&rows[header_row]);
    let body = rows[header_row + 1..]
        .iter()
        .filter(|r| !is_blank_row(r))
        .map(|r| render_row(r));

    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;
    let mut buf = String::new();
    if !preamble.is_empty() {
        buf.push_str(&preamble.join("\n"));
        buf.push('\n');
    }
    buf.push_str(&header);
    let mut has_body = false;

    for line in body {
        if has_body && buf.len() + 1 + line.len() > max_chars {
            chunks.push(make_chunk(document_id, chunk_index, &buf));
            chunk_index += 1;
            buf.clear();
            buf.push_str(&header);
            has_body = false;
        }
        buf.push('\n');
        buf.push_str(&line);
        has_body = true;
    }
    if has_body || chunks.is_empty() {
        chunks.push(make_chunk(document_id, chunk_index, &buf));
    }
    chunks
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
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

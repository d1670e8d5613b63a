//! Lossless document chunker.
//!
//! Splits a [`Document`] into [`Chunk`]s bounded by a configurable character
//! limit derived from the embedding input budget. Splitting prefers newline
//! and space boundaries but never drops or trims text: concatenating the
//! chunk texts in order reproduces the document body exactly.
//!
//! Very large documents (above `coarse_threshold` chars) are first cut into
//! coarse windows so that a single pathological file cannot hold the fine
//! splitter's scan buffer at hundreds of megabytes. Each coarse window
//! records its char-offset range in `chunkStart`/`chunkEnd` metadata.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document, META_CHUNK_END, META_CHUNK_START};

/// Approximate chars-per-token ratio used to derive the fine limit.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document into ordered chunks. Pure: the input is not mutated.
pub fn split_document(doc: &Document, cfg: &ChunkingConfig) -> Vec<Chunk> {
    let max_chars = cfg.max_tokens * CHARS_PER_TOKEN;
    if doc.text.is_empty() {
        return Vec::new();
    }

    let char_len = doc.text.chars().count();
    if char_len <= cfg.coarse_threshold_chars {
        return fine_split(&doc.text, max_chars)
            .into_iter()
            .map(|piece| Chunk::new(piece, doc.metadata.clone()))
            .collect();
    }

    let mut chunks = Vec::new();
    for window in coarse_windows(&doc.text, cfg.coarse_window_chars) {
        let mut metadata = doc.metadata.clone();
        metadata.insert(META_CHUNK_START.to_string(), window.start_char.to_string());
        metadata.insert(META_CHUNK_END.to_string(), window.end_char.to_string());
        for piece in fine_split(window.text, max_chars) {
            chunks.push(Chunk::new(piece, metadata.clone()));
        }
    }
    chunks
}

struct CoarseWindow<'a> {
    start_char: usize,
    end_char: usize,
    text: &'a str,
}

/// Cut text into consecutive windows of at most `window_chars` chars,
/// always on char boundaries. Windows tile the text with no gaps.
fn coarse_windows(text: &str, window_chars: usize) -> Vec<CoarseWindow<'_>> {
    let mut windows = Vec::new();
    let mut start_byte = 0;
    let mut start_char = 0;
    let mut chars_in_window = 0;

    for (byte_idx, _) in text.char_indices() {
        if chars_in_window == window_chars {
            windows.push(CoarseWindow {
                start_char,
                end_char: start_char + chars_in_window,
                text: &text[start_byte..byte_idx],
            });
            start_byte = byte_idx;
            start_char += chars_in_window;
            chars_in_window = 0;
        }
        chars_in_window += 1;
    }
    if chars_in_window > 0 {
        windows.push(CoarseWindow {
            start_char,
            end_char: start_char + chars_in_window,
            text: &text[start_byte..],
        });
    }
    windows
}

/// Split text into pieces of at most `max_chars` chars, preferring to break
/// just after a newline, then a space. Pieces concatenate back to the input.
fn fine_split(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        // Byte offset of the char just past the limit, if the tail is long enough.
        let hard = match rest.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => byte_idx,
            None => {
                pieces.push(rest);
                break;
            }
        };
        let window = &rest[..hard];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(hard);
        pieces.push(&rest[..split_at]);
        rest = &rest[split_at..];
    }
    pieces
}

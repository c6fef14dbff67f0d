//! Overlapping text chunker.
//!
//! Splits extracted document text into chunks of at most `chunk_size`
//! characters, where consecutive chunks of the same document share exactly
//! `chunk_overlap` characters. Chunk boundaries prefer paragraph (`\n\n`),
//! then line, then word breaks, falling back to a hard cut at a UTF-8
//! character boundary.
//!
//! Chunks are contiguous slices of the original text: chunk `i+1` starts
//! exactly `chunk_overlap` characters before chunk `i` ends. Concatenating
//! a document's chunks with the overlap removed reconstructs the original
//! text, and the whole procedure is deterministic for a given input and
//! parameters.

use crate::models::{Chunk, ExtractedDocument};

/// Split extracted documents into overlapping [`Chunk`]s.
///
/// Every chunk inherits its parent document's `source_id`. An empty input
/// list yields an empty output.
pub fn chunk_documents(
    docs: &[ExtractedDocument],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in docs {
        for piece in split_text(&doc.text, chunk_size, chunk_overlap) {
            chunks.push(Chunk {
                text: piece.to_string(),
                source_id: doc.source_id.clone(),
            });
        }
    }
    chunks
}

/// Split `text` into overlapping windows of at most `chunk_size` characters.
///
/// `chunk_overlap` must be smaller than `chunk_size` (validated at config
/// load). Empty text yields no pieces.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<&str> {
    assert!(
        chunk_overlap < chunk_size,
        "chunk_overlap must be < chunk_size"
    );

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the text, so the
    // windowing below can work in character counts while slicing by bytes.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let n_chars = bounds.len() - 1;

    let mut pieces = Vec::new();
    let mut start = 0usize; // char index

    loop {
        let hard_end = (start + chunk_size).min(n_chars);
        let end = if hard_end < n_chars {
            // The window must advance past the overlap region, otherwise the
            // next chunk would not make progress.
            let min_end = start + chunk_overlap + 1;
            find_break(text, &bounds, min_end, hard_end)
        } else {
            hard_end
        };

        pieces.push(&text[bounds[start]..bounds[end]]);

        if end == n_chars {
            break;
        }
        start = end - chunk_overlap;
    }

    pieces
}

/// Find the best break position in `(min_end, hard_end]`, as a char index.
///
/// Prefers the last paragraph break, then line break, then space within the
/// window; positions are just after the separator. Falls back to `hard_end`.
fn find_break(text: &str, bounds: &[usize], min_end: usize, hard_end: usize) -> usize {
    debug_assert!(min_end <= hard_end);
    let window = &text[bounds[min_end]..bounds[hard_end]];

    for sep in ["\n\n", "\n", " "] {
        if let Some(pos) = window.rfind(sep) {
            let abs = bounds[min_end] + pos + sep.len();
            // Separators are ASCII, so `abs` is a char boundary.
            if let Ok(char_idx) = bounds.binary_search(&abs) {
                if char_idx > min_end {
                    return char_idx;
                }
            }
        }
    }

    hard_end
}

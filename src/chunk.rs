//! Recursive character text splitter.
//!
//! Splits each page of a document into [`RawFragment`]s of at most
//! `chunk_size` characters, with `chunk_overlap` characters carried over
//! between consecutive fragments of the same page.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs
//!    in the text (`""` splits into single characters).
//! 2. Split on it. Pieces shorter than `chunk_size` are buffered; a piece
//!    that is too long flushes the buffer and is split recursively with
//!    the remaining separators.
//! 3. Buffered pieces are merged back together (joined by the separator)
//!    into fragments no longer than `chunk_size`, dropping pieces from the
//!    front of the window until at most `chunk_overlap` characters remain.
//!
//! Lengths are counted in `char`s, never bytes. Fragments are trimmed and
//! empty fragments are dropped, so a blank page yields nothing.

use crate::config::ChunkingConfig;
use crate::models::RawFragment;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split a document's pages into raw fragments, page by page, in order.
///
/// `pages[i]` is page number `i`.
pub fn split_pages(source: &str, pages: &[String], config: &ChunkingConfig) -> Vec<RawFragment> {
    let mut out = Vec::new();
    for (page, text) in pages.iter().enumerate() {
        for piece in split_text(text, config.chunk_size, config.chunk_overlap) {
            out.push(RawFragment::new(source, page as i64, piece));
        }
    }
    out
}

/// Split a single text into pieces of at most `chunk_size` characters.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let (sep_idx, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, s)| s.is_empty() || text.contains(**s))
        .map(|(i, s)| (i, *s))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let remaining = &separators[(sep_idx + 1).min(separators.len())..];

    let splits: Vec<String> = if separator.is_empty() {
        text.chars().map(|c| c.to_string()).collect()
    } else {
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut good: Vec<String> = Vec::new();

    for s in splits {
        if char_len(&s) < chunk_size {
            good.push(s);
            continue;
        }
        if !good.is_empty() {
            chunks.extend(merge_splits(&good, separator, chunk_size, chunk_overlap));
            good.clear();
        }
        if remaining.is_empty() {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        } else {
            chunks.extend(split_recursive(&s, remaining, chunk_size, chunk_overlap));
        }
    }

    if !good.is_empty() {
        chunks.extend(merge_splits(&good, separator, chunk_size, chunk_overlap));
    }

    chunks
}

fn merge_splits(
    splits: &[String],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for s in splits {
        let len = char_len(s);
        let joiner = if current.is_empty() { 0 } else { sep_len };

        if total + len + joiner > chunk_size && !current.is_empty() {
            push_joined(&mut docs, &current, separator);

            // Shrink the window to the overlap, and until the next piece fits.
            while total > chunk_overlap
                || (total > 0
                    && total + len + if current.is_empty() { 0 } else { sep_len } > chunk_size)
            {
                if current.is_empty() {
                    break;
                }
                let first_len = char_len(current[0]);
                let dropped = first_len + if current.len() > 1 { sep_len } else { 0 };
                total = total.saturating_sub(dropped);
                current.remove(0);
            }
        }

        current.push(s);
        total += len + if current.len() > 1 { sep_len } else { 0 };
    }

    push_joined(&mut docs, &current, separator);
    docs
}

fn push_joined(docs: &mut Vec<String>, current: &[&str], separator: &str) {
    let joined = current.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

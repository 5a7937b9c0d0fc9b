//! Recursive character splitting for index chunks.
//!
//! Files are cut into chunks of at most [`CHUNK_SIZE`] characters with
//! [`CHUNK_OVERLAP`] characters of context shared between neighbours. The
//! splitter walks a separator list from coarsest to finest, so Python
//! sources break at `class`/`def` boundaries before falling back to blank
//! lines, lines, words, and finally raw character windows. Counting is
//! character-based and therefore UTF-8 safe.

/// Maximum chunk length in characters.
pub const CHUNK_SIZE: usize = 1000;
/// Target overlap between consecutive chunks in characters.
pub const CHUNK_OVERLAP: usize = 200;

const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];
const PYTHON_SEPARATORS: &[&str] = &["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " ", ""];

/// Splits one file's content using the separator list for its kind.
#[must_use]
pub fn chunk_source(file_path: &str, content: &str) -> Vec<String> {
    let separators = if file_path.ends_with(".py") {
        PYTHON_SEPARATORS
    } else {
        DEFAULT_SEPARATORS
    };
    split_recursive(content, separators, CHUNK_SIZE, CHUNK_OVERLAP)
        .into_iter()
        .map(|chunk| chunk.trim().to_owned())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    overlap: usize,
) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return vec![text.to_owned()];
    }
    let Some((separator, finer)) = choose_separator(text, separators) else {
        return window_by_chars(text, chunk_size, overlap);
    };
    if separator.is_empty() {
        return window_by_chars(text, chunk_size, overlap);
    }

    let mut chunks = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for piece in split_keeping_separator(text, separator) {
        if char_len(&piece) <= chunk_size {
            pending.push(piece);
        } else {
            if !pending.is_empty() {
                chunks.extend(merge_pieces(&pending, chunk_size, overlap));
                pending.clear();
            }
            chunks.extend(split_recursive(&piece, finer, chunk_size, overlap));
        }
    }
    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, chunk_size, overlap));
    }
    chunks
}

/// Picks the first separator that occurs in the text, returning the finer
/// separators left for recursion.
fn choose_separator<'a>(text: &str, separators: &'a [&'a str]) -> Option<(&'a str, &'a [&'a str])> {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return Some((separator, separators.get(position + 1..).unwrap_or(&[])));
        }
    }
    None
}

/// Splits on a separator, keeping the separator attached to the start of the
/// following piece so a chunk opening at a `def` boundary retains it.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece_start = 0;
    let mut search_from = 0;
    while let Some(found) = text.get(search_from..).and_then(|rest| rest.find(separator)) {
        let at = search_from + found;
        if at > piece_start {
            if let Some(piece) = text.get(piece_start..at) {
                pieces.push(piece.to_owned());
            }
            piece_start = at;
        }
        search_from = at + separator.len();
    }
    if let Some(piece) = text.get(piece_start..) {
        if !piece.is_empty() {
            pieces.push(piece.to_owned());
        }
    }
    pieces
}

/// Greedily packs pieces into chunks of at most `chunk_size` characters,
/// carrying the trailing pieces up to `overlap` characters into the next
/// chunk.
fn merge_pieces(pieces: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<&str> = Vec::new();
    let mut window_len = 0;

    for piece in pieces {
        let piece_len = char_len(piece);
        if window_len + piece_len > chunk_size && !window.is_empty() {
            chunks.push(window.concat());
            while window_len > overlap
                || (window_len + piece_len > chunk_size && !window.is_empty())
            {
                let Some(dropped) = window.first() else {
                    break;
                };
                window_len -= char_len(dropped);
                window.remove(0);
            }
        }
        window.push(piece.as_str());
        window_len += piece_len;
    }
    if !window.is_empty() {
        chunks.push(window.concat());
    }
    chunks
}

/// Last-resort split: fixed character windows stepping by
/// `chunk_size - overlap`.
fn window_by_chars(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let characters: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < characters.len() {
        let end = (start + chunk_size).min(characters.len());
        chunks.push(characters.get(start..end).unwrap_or(&[]).iter().collect());
        if end == characters.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_boundary(left: &str, right: &str) -> usize {
        (1..=right.len().min(left.len()))
            .rev()
            .find(|&k| right.is_char_boundary(k) && left.ends_with(&right[..k]))
            .unwrap_or(0)
    }

    #[test]
    fn short_content_is_a_single_chunk() {
        let chunks = chunk_source("lib.rs", "fn main() {}\n");
        assert_eq!(chunks, vec!["fn main() {}".to_owned()]);
    }

    #[test]
    fn chunks_never_exceed_the_size_limit() {
        let text = "lorem ipsum dolor sit amet ".repeat(200);
        for chunk in chunk_source("notes.txt", &text) {
            assert!(chunk.chars().count() <= CHUNK_SIZE, "chunk too large");
        }
    }

    #[test]
    fn python_sources_split_at_definition_boundaries() {
        let body = "    value = 1\n".repeat(60);
        let source = format!("def first():\n{body}\ndef second():\n{body}");
        let chunks = chunk_source("main.py", &source);
        assert!(chunks.len() >= 2, "expected a split, got {} chunk(s)", chunks.len());
        assert!(chunks[0].starts_with("def first"), "first chunk: {:?}", &chunks[0][..20]);
        assert!(
            chunks.iter().any(|chunk| chunk.starts_with("def second")),
            "a chunk should open at the second definition"
        );
    }

    #[test]
    fn consecutive_chunks_share_overlapping_context() {
        let words: Vec<String> = (0..30)
            .map(|i| format!("w{i:02}{}", "a".repeat(96)))
            .collect();
        let text = words.join(" ");
        let chunks = chunk_source("flat.txt", &text);
        assert!(chunks.len() >= 2, "expected multiple chunks");
        let shared = shared_boundary(&chunks[0], &chunks[1]);
        assert!(shared >= 150, "expected a substantial overlap, found {shared}");
    }

    #[test]
    fn pathological_unbroken_text_falls_back_to_char_windows() {
        let text = "x".repeat(2500);
        let chunks = chunk_source("blob.txt", &text);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_SIZE);
        }
    }

    #[test]
    fn multibyte_text_is_split_on_character_boundaries() {
        let text = "héllo wörld ".repeat(200);
        for chunk in chunk_source("unicode.txt", &text) {
            assert!(chunk.chars().count() <= CHUNK_SIZE);
        }
    }
}

//! Fixed-size, overlapping character-window chunker.
//!
//! Splits a document's text into [`Chunk`]s of `chunk_size` characters.
//! Each window after the first starts `chunk_size - overlap` characters
//! after its predecessor, so neighbours share exactly `overlap`
//! characters. Windows are measured in Unicode scalar values, never
//! bytes, so multi-byte text is never split mid-character.
//!
//! # Algorithm
//!
//! 1. Validate `overlap < chunk_size` (otherwise [`Error::Configuration`]).
//! 2. Emit `text[start..start + chunk_size]`, clamped to the end of text.
//! 3. Stop once a window reaches the end of the text; otherwise advance
//!    `start` by the stride and repeat.
//!
//! Empty text yields no chunks. The last chunk may be shorter than
//! `chunk_size`.
//!
//! # Example
//!
//! ```rust
//! use docchat::chunk::chunk_text;
//! use docchat::config::ChunkingConfig;
//!
//! let params = ChunkingConfig::new(20, 5).unwrap();
//! let chunks = chunk_text("notes.txt", "The sky is blue. Grass is green.", &params).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "The sky is blue. Gra");
//! assert_eq!(chunks[1].text, ". Grass is green.");
//! ```

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Split one document's text into overlapping windows.
///
/// [`Error::Configuration`](crate::Error::Configuration) if
/// `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk_text(
    document: &str,
    text: &str,
    params: &ChunkingConfig,
) -> crate::Result<Vec<Chunk>> {
    params.validate()?;

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::new();
    if char_count == 0 {
        return Ok(chunks);
    }

    let stride = params.stride();
    let mut start = 0usize;
    let mut ordinal = 0u32;

    loop {
        let end = (start + params.chunk_size).min(char_count);
        chunks.push(make_chunk(
            document,
            ordinal,
            &text[boundaries[start]..boundaries[end]],
        ));
        if end == char_count {
            break;
        }
        start += stride;
        ordinal += 1;
    }

    Ok(chunks)
}

/// Chunk every document in order, validating parameters first.
///
/// Ordinals restart at 0 for each document; document order is preserved.
pub fn chunk_documents(documents: &[Document], params: &ChunkingConfig) -> crate::Result<Vec<Chunk>> {
    params.validate()?;
    let mut chunks = Vec::new();
    for doc in documents {
        chunks.extend(chunk_text(&doc.name, &doc.text, params)?);
    }
    Ok(chunks)
}

pub(crate) fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document: &str, ordinal: u32, text: &str) -> Chunk {
    Chunk {
        document: document.to_string(),
        ordinal,
        text: text.to_string(),
        hash: hash_text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn params(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(size, overlap).unwrap()
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("doc", "", &params(20, 5)).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("doc", "Hello, world!", &params(20, 5)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_exact_size_single_chunk() {
        let chunks = chunk_text("doc", "abcdefghij", &params(10, 3)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_sky_example() {
        let chunks = chunk_text("sky.txt", "The sky is blue. Grass is green.", &params(20, 5)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "The sky is blue. Gra");
        assert_eq!(chunks[1].text, ". Grass is green.");
        assert!(chunks[0].text.contains("sky is blue"));
    }

    #[test]
    fn test_neighbours_overlap_exactly() {
        let text: String = (0..500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let p = params(64, 16);
        let chunks = chunk_text("doc", &text, &p).unwrap();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            assert_eq!(prev.len(), 64);
            let tail: String = prev[prev.len() - 16..].iter().collect();
            let head: String = next[..16].iter().collect();
            assert_eq!(tail, head);
        }
        let last = chunks.last().unwrap();
        assert!(text.ends_with(&last.text));
    }

    #[test]
    fn test_zero_overlap_partitions_text() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_text("doc", text, &params(10, 0)).unwrap();
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_multibyte_characters() {
        let text = "héllo wörld ünïcødé ✓✓✓";
        let chunks = chunk_text("doc", text, &params(8, 2)).unwrap();
        for c in &chunks {
            assert!(c.text.chars().count() <= 8);
        }
        assert_eq!(chunks[0].text, "héllo wö");
        assert!(text.ends_with(&chunks.last().unwrap().text));
    }

    #[test]
    fn test_ordinals_contiguous() {
        let text = "x".repeat(1000);
        let chunks = chunk_text("doc", &text, &params(100, 30)).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as u32);
            assert_eq!(c.document, "doc");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let c1 = chunk_text("doc", text, &params(12, 4)).unwrap();
        let c2 = chunk_text("doc", text, &params(12, 4)).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_chunk_documents_preserves_order() {
        let docs = vec![
            Document::new("a.txt", "first document text"),
            Document::new("b.txt", "second"),
        ];
        let chunks = chunk_documents(&docs, &params(10, 2)).unwrap();
        assert_eq!(chunks.first().unwrap().document, "a.txt");
        assert_eq!(chunks.last().unwrap().document, "b.txt");
        assert_eq!(chunks.last().unwrap().ordinal, 0);
    }

    #[test]
    fn test_chunk_documents_rejects_bad_overlap() {
        let bad = ChunkingConfig {
            chunk_size: 10,
            overlap: 10,
        };
        let err = chunk_documents(&[Document::new("a", "text")], &bad).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_chunk_text_rejects_invalid_params() {
        for (chunk_size, overlap) in [(5, 10), (5, 5), (0, 0)] {
            let bad = ChunkingConfig {
                chunk_size,
                overlap,
            };
            let err = chunk_text("d", "abcdefghijkl", &bad).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_hash_matches_text() {
        let chunks = chunk_text("doc", "same", &params(10, 2)).unwrap();
        assert_eq!(chunks[0].hash, hash_text("same"));
    }
}

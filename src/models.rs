//! Core data models used throughout docchat.
//!
//! These types represent the documents, chunks, and search hits that flow
//! through the ingestion and retrieval pipeline.

use serde::Serialize;

/// A document's name and its extracted text.
///
/// Immutable once extracted; owned by the session for the lifetime of
/// one document set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub text: String,
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// A window of a document's text, the unit of retrieval.
///
/// `(document, ordinal)` identifies a chunk uniquely within an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub document: String,
    pub ordinal: u32,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    pub fn id(&self) -> String {
        format!("{}#{}", self.document, self.ordinal)
    }
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A search result: the chunk and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

//! In-memory vector index: build from chunks, exact cosine search.
//!
//! A [`VectorIndex`] holds one [`IndexEntry`] per chunk, all of the same
//! dimension, with `(document, ordinal)` unique. It is produced by a full
//! [`VectorIndex::build`] and never updated incrementally.
//!
//! # Search
//!
//! Exact linear scan. Every entry is scored by
//! [`cosine_similarity`](crate::embedding::cosine_similarity) against the
//! query and results are ordered by score descending, ties broken by
//! insertion order. Corpora here are a handful of documents, so a scan
//! over a few thousand vectors is well under a millisecond per query.

use std::collections::HashSet;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Chunk, IndexEntry, SearchHit};

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    model: String,
    fingerprint: Option<String>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed every chunk and assemble an index, all or nothing.
    ///
    /// Chunks are embedded in batches of `batch_size`, in order. Any
    /// embedding error, a short response, or a vector of the wrong
    /// dimension fails the whole build; nothing is returned partially.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let dimension = embedder.dims();
        let batch_size = batch_size.max(1);
        let mut entries = Vec::with_capacity(chunks.len());

        let mut remaining = chunks.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<Chunk> = remaining.by_ref().take(batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(Error::embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for (chunk, vector) in batch.into_iter().zip(vectors) {
                entries.push(IndexEntry { chunk, vector });
            }
            tracing::debug!(embedded = entries.len(), "embedded batch");
        }

        Self::from_entries(dimension, embedder.model_name(), entries)
    }

    /// Assemble an index from already-embedded entries, checking that every
    /// vector has `dimension` components and that chunk ids are unique.
    pub fn from_entries(
        dimension: usize,
        model: impl Into<String>,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: entry.vector.len(),
                });
            }
            if !seen.insert((entry.chunk.document.as_str(), entry.chunk.ordinal)) {
                return Err(Error::embedding(format!(
                    "duplicate chunk id {}",
                    entry.chunk.id()
                )));
            }
        }

        Ok(Self {
            dimension,
            model: model.into(),
            fingerprint: None,
            entries,
        })
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Return the `k` entries most similar to `query`, best first.
    ///
    /// `k >= len()` returns every entry exactly once. A query whose length
    /// differs from the index dimension is a [`Error::DimensionMismatch`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(query, &entry.vector)))
            .collect();

        // Stable order: score descending, then insertion position.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| SearchHit {
                chunk: self.entries[position].chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embedding model the vectors were produced with.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct source document names, in first-seen order.
    pub fn documents(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.chunk.document.as_str()))
            .map(|e| e.chunk.document.clone())
            .collect()
    }
}

//! Retriever: question in, top-k chunks out.

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::Chunk;

/// Embed `question` and return the `k` most similar chunks, best first.
///
/// The embedder must produce vectors of the index's dimension; an index
/// built under a different embedding configuration is rejected with
/// [`Error::DimensionMismatch`] rather than searched. An empty index
/// returns no chunks without calling the embedder.
pub async fn retrieve(
    question: &str,
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    k: usize,
) -> Result<Vec<Chunk>> {
    if embedder.dims() != index.dimension() {
        return Err(Error::DimensionMismatch {
            expected: index.dimension(),
            actual: embedder.dims(),
        });
    }
    if index.is_empty() {
        return Ok(Vec::new());
    }

    let query = embed_one(embedder, question).await?;
    let hits = index.search(&query, k)?;
    tracing::debug!(
        k,
        hits = hits.len(),
        best = hits.first().map(|h| h.score).unwrap_or(0.0),
        "retrieved chunks"
    );

    Ok(hits.into_iter().map(|h| h.chunk).collect())
}

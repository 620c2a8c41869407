//! Index cache manager: decides between reusing and rebuilding the index.
//!
//! # States
//!
//! ```text
//!            build+persist                document set changed
//!   Absent ───────────────▶ Fresh ─────────────────────────▶ Stale
//!     ▲     adopt matching    │  ▲            rebuild           │
//!     │     persisted index   │  └──────────────────────────────┘
//!     └────────── reset ──────┴──────────── reset ──────────────┘
//! ```
//!
//! [`IndexCache::ensure_fresh`] is called at the top of every retrieval.
//! In `Fresh` it returns the cached index (loading it from the store if
//! only the persisted copy exists). In `Absent` it first tries to adopt a
//! persisted index whose fingerprint matches the current document set;
//! otherwise, and always in `Stale`, it rebuilds.
//!
//! A rebuild holds the store's [`LocationLock`] from chunking to persist.
//! If any step fails, or the embedding phase exceeds its deadline, the
//! state, the in-memory index and the persisted store are left exactly
//! as they were.

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::chunk::chunk_documents;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::Document;
use crate::store::{IndexStore, LocationLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Fresh,
    Stale,
}

/// Parameters of an index build.
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    /// Deadline for embedding every chunk.
    pub timeout: Duration,
}

impl BuildParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking,
            batch_size: config.embedding.batch_size,
            timeout: config.embedding.build_timeout(),
        }
    }
}

/// SHA-256 over the document set, chunking parameters and embedding model.
///
/// Lengths are hashed ahead of every variable-size field so that no two
/// distinct inputs share a byte stream.
pub fn fingerprint(documents: &[Document], chunking: &ChunkingConfig, model: &str) -> String {
    let mut hasher = Sha256::new();
    let mut field = |bytes: &[u8]| {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };
    field(model.as_bytes());
    field(&(chunking.chunk_size as u64).to_le_bytes()[..]);
    field(&(chunking.overlap as u64).to_le_bytes()[..]);
    for doc in documents {
        field(doc.name.as_bytes());
        field(doc.text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub struct IndexCache<S: IndexStore> {
    store: S,
    state: CacheState,
    current: Option<VectorIndex>,
}

impl<S: IndexStore> IndexCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: CacheState::Absent,
            current: None,
        }
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The in-memory index, if one is cached.
    pub fn current(&self) -> Option<&VectorIndex> {
        self.current.as_ref()
    }

    /// Record that the document set changed. `Fresh` becomes `Stale`;
    /// `Absent` stays `Absent`.
    pub fn mark_stale(&mut self) {
        if self.state == CacheState::Fresh {
            self.state = CacheState::Stale;
        }
        self.current = None;
    }

    /// Drop the cached index and remove the persisted store. Idempotent.
    pub async fn reset(&mut self) -> Result<()> {
        let _guard = LocationLock::acquire(&self.store.location()).await;
        self.store.remove().await?;
        self.current = None;
        self.state = CacheState::Absent;
        Ok(())
    }

    /// Return an index that reflects `documents`, rebuilding if needed.
    pub async fn ensure_fresh(
        &mut self,
        documents: &[Document],
        embedder: &dyn EmbeddingProvider,
        params: &BuildParams,
    ) -> Result<&VectorIndex> {
        let fp = fingerprint(documents, &params.chunking, embedder.model_name());

        match self.state {
            CacheState::Fresh
                if self.current.as_ref().and_then(|i| i.fingerprint()) == Some(fp.as_str()) =>
            {
                tracing::debug!("index fresh, reusing in-memory copy");
            }
            CacheState::Fresh | CacheState::Absent => {
                let persisted = self.load_matching(&fp, embedder).await?;
                match persisted {
                    Some(index) => {
                        tracing::info!(
                            location = %self.store.location(),
                            entries = index.len(),
                            "reusing persisted index"
                        );
                        self.current = Some(index);
                        self.state = CacheState::Fresh;
                    }
                    None => self.rebuild(documents, embedder, params, fp).await?,
                }
            }
            CacheState::Stale => self.rebuild(documents, embedder, params, fp).await?,
        }

        self.current
            .as_ref()
            .ok_or_else(|| Error::IndexNotFound(self.store.location()))
    }

    /// Load the persisted index if it was built from the same inputs.
    ///
    /// Missing or corrupt stores yield `None` so the caller rebuilds. A
    /// stored dimension that disagrees with the embedder is an error.
    async fn load_matching(
        &self,
        fp: &str,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Option<VectorIndex>> {
        let index = match self.store.load().await {
            Ok(index) => index,
            Err(Error::IndexNotFound(_)) => return Ok(None),
            Err(e @ Error::IndexCorrupt { .. }) => {
                tracing::warn!(error = %e, "persisted index unusable, rebuilding");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if index.dimension() != embedder.dims() {
            return Err(Error::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dims(),
            });
        }
        if index.fingerprint() != Some(fp) {
            tracing::debug!("persisted index built from different inputs");
            return Ok(None);
        }
        Ok(Some(index))
    }

    async fn rebuild(
        &mut self,
        documents: &[Document],
        embedder: &dyn EmbeddingProvider,
        params: &BuildParams,
        fp: String,
    ) -> Result<()> {
        let _guard = LocationLock::acquire(&self.store.location()).await;
        let started = Instant::now();

        let chunks = chunk_documents(documents, &params.chunking)?;
        let chunk_count = chunks.len();

        let index = tokio::time::timeout(
            params.timeout,
            VectorIndex::build(chunks, embedder, params.batch_size),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: "index build",
            after: params.timeout,
        })??
        .with_fingerprint(fp);

        self.store.persist(&index).await?;

        tracing::info!(
            documents = documents.len(),
            chunks = chunk_count,
            dimension = index.dimension(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt index"
        );
        self.current = Some(index);
        self.state = CacheState::Fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryIndexStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        dims: usize,
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl CountingEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
                fail: false,
                delay: None,
            }
        }
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(Error::embedding("service unavailable"));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dims]).collect())
        }
    }

    fn params() -> BuildParams {
        BuildParams {
            chunking: ChunkingConfig::new(20, 5).unwrap(),
            batch_size: 16,
            timeout: Duration::from_secs(5),
        }
    }

    fn docs(names: &[&str]) -> Vec<Document> {
        names
            .iter()
            .map(|n| Document::new(*n, format!("contents of {}", n)))
            .collect()
    }

    #[tokio::test]
    async fn absent_builds_then_fresh_reuses() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        let embedder = CountingEmbedder::new(2);
        let documents = docs(&["a.txt"]);
        assert_eq!(cache.state(), CacheState::Absent);

        cache.ensure_fresh(&documents, &embedder, &params()).await.unwrap();
        assert_eq!(cache.state(), CacheState::Fresh);
        let calls = embedder.calls();

        cache.ensure_fresh(&documents, &embedder, &params()).await.unwrap();
        assert_eq!(embedder.calls(), calls);
        assert!(cache.store().exists().await.unwrap());
    }

    #[tokio::test]
    async fn stale_rebuilds_with_new_documents() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        let embedder = CountingEmbedder::new(2);
        cache.ensure_fresh(&docs(&["a.txt"]), &embedder, &params()).await.unwrap();

        cache.mark_stale();
        assert_eq!(cache.state(), CacheState::Stale);
        let index = cache
            .ensure_fresh(&docs(&["a.txt", "b.txt"]), &embedder, &params())
            .await
            .unwrap();
        assert_eq!(index.documents(), vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(cache.state(), CacheState::Fresh);
    }

    #[tokio::test]
    async fn absent_adopts_matching_persisted_index() {
        let store = InMemoryIndexStore::default();
        let documents = docs(&["a.txt"]);
        let first = CountingEmbedder::new(2);
        let mut cache = IndexCache::new(store);
        cache.ensure_fresh(&documents, &first, &params()).await.unwrap();

        // A new manager over the same store, as after a restart.
        let IndexCache { store, .. } = cache;
        let mut restarted = IndexCache::new(store);
        let second = CountingEmbedder::new(2);
        restarted.ensure_fresh(&documents, &second, &params()).await.unwrap();
        assert_eq!(second.calls(), 0);
        assert_eq!(restarted.state(), CacheState::Fresh);
    }

    #[tokio::test]
    async fn absent_rebuilds_when_fingerprint_differs() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        let embedder = CountingEmbedder::new(2);
        cache.ensure_fresh(&docs(&["a.txt"]), &embedder, &params()).await.unwrap();

        let IndexCache { store, .. } = cache;
        let mut restarted = IndexCache::new(store);
        let second = CountingEmbedder::new(2);
        restarted.ensure_fresh(&docs(&["z.txt"]), &second, &params()).await.unwrap();
        assert!(second.calls() > 0);
    }

    #[tokio::test]
    async fn stored_dimension_mismatch_is_reported() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        cache
            .ensure_fresh(&docs(&["a.txt"]), &CountingEmbedder::new(2), &params())
            .await
            .unwrap();

        let IndexCache { store, .. } = cache;
        let mut restarted = IndexCache::new(store);
        let err = restarted
            .ensure_fresh(&docs(&["a.txt"]), &CountingEmbedder::new(3), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn failed_rebuild_leaves_prior_index() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        let good = CountingEmbedder::new(2);
        cache.ensure_fresh(&docs(&["a.txt"]), &good, &params()).await.unwrap();
        let before = cache.store().load().await.unwrap();

        cache.mark_stale();
        let bad = CountingEmbedder {
            fail: true,
            ..CountingEmbedder::new(2)
        };
        let err = cache
            .ensure_fresh(&docs(&["a.txt", "b.txt"]), &bad, &params())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert_eq!(cache.state(), CacheState::Stale);
        assert_eq!(cache.store().load().await.unwrap(), before);
    }

    #[tokio::test]
    async fn build_timeout_leaves_store_untouched() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        let slow = CountingEmbedder {
            delay: Some(Duration::from_millis(500)),
            ..CountingEmbedder::new(2)
        };
        let quick = BuildParams {
            timeout: Duration::from_millis(20),
            ..params()
        };
        let err = cache
            .ensure_fresh(&docs(&["a.txt"]), &slow, &quick)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "index build", .. }));
        assert_eq!(cache.state(), CacheState::Absent);
        assert!(!cache.store().exists().await.unwrap());
    }

    #[tokio::test]
    async fn reset_returns_to_absent() {
        let mut cache = IndexCache::new(InMemoryIndexStore::default());
        let embedder = CountingEmbedder::new(2);
        cache.ensure_fresh(&docs(&["a.txt"]), &embedder, &params()).await.unwrap();
        cache.reset().await.unwrap();
        cache.reset().await.unwrap();
        assert_eq!(cache.state(), CacheState::Absent);
        assert!(cache.current().is_none());
        assert!(matches!(cache.store().load().await, Err(Error::IndexNotFound(_))));
    }

    #[test]
    fn fingerprint_depends_on_every_input() {
        let chunking = ChunkingConfig::new(20, 5).unwrap();
        let base = fingerprint(&docs(&["a"]), &chunking, "m");
        assert_eq!(base, fingerprint(&docs(&["a"]), &chunking, "m"));
        assert_ne!(base, fingerprint(&docs(&["b"]), &chunking, "m"));
        assert_ne!(base, fingerprint(&docs(&["a"]), &chunking, "other"));
        assert_ne!(
            base,
            fingerprint(&docs(&["a"]), &ChunkingConfig::new(20, 4).unwrap(), "m")
        );
    }
}

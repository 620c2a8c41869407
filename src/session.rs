//! The question-answering session.
//!
//! A [`Session`] owns everything one user works with: the current
//! document set, the [`IndexCache`] over a persisted store, the
//! conversation [`History`], and the two capabilities. Every operation is
//! a method on it; there is no ambient global state, so independent
//! sessions (and tests) never interfere.
//!
//! # Lifecycle
//!
//! ```text
//! new ─▶ upload ─▶ ask ─▶ ask ─▶ upload ─▶ ask ─▶ … ─▶ reset ─▶ (empty again)
//!           │        └─ ensure_fresh: rebuild or reuse the index
//!           └─ document set changed: index marked stale
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::answer::{self, Answer};
use crate::cache::{BuildParams, CacheState, IndexCache};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::extract;
use crate::history::History;
use crate::index::VectorIndex;
use crate::llm::{create_language_provider, LanguageProvider};
use crate::models::{Chunk, Document};
use crate::retrieve::retrieve;
use crate::store::{IndexStore, SqliteIndexStore};

/// The result of one successful [`Session::ask`].
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub question: String,
    pub answer: Answer,
    /// Retrieved context, best first.
    pub chunks: Vec<Chunk>,
    pub model_name: String,
    pub source_documents: Vec<String>,
}

pub struct Session<S: IndexStore> {
    config: Config,
    documents: Vec<Document>,
    cache: IndexCache<S>,
    history: History,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageProvider>,
}

impl Session<SqliteIndexStore> {
    /// Build providers and the SQLite store from a validated config.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let llm: Arc<dyn LanguageProvider> = Arc::from(create_language_provider(&config.llm)?);
        let store = SqliteIndexStore::new(config.store.path.clone());
        Ok(Self::new(config, store, embedder, llm))
    }
}

impl<S: IndexStore> Session<S> {
    pub fn new(
        config: Config,
        store: S,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageProvider>,
    ) -> Self {
        Self {
            config,
            documents: Vec::new(),
            cache: IndexCache::new(store),
            history: History::new(),
            embedder,
            llm,
        }
    }

    /// Add documents to the set, replacing any with the same name.
    ///
    /// An empty upload is an [`Error::Ingestion`] and changes nothing.
    /// If the set actually changed, the index is marked stale.
    pub fn upload(&mut self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Err(Error::ingestion("(upload)", "no documents in upload"));
        }

        let mut changed = false;
        for doc in documents {
            match self.documents.iter_mut().find(|d| d.name == doc.name) {
                Some(existing) if *existing == doc => {}
                Some(existing) => {
                    *existing = doc;
                    changed = true;
                }
                None => {
                    self.documents.push(doc);
                    changed = true;
                }
            }
        }

        if changed {
            self.cache.mark_stale();
            tracing::info!(documents = self.documents.len(), "document set changed");
        }
        Ok(())
    }

    /// Extract `paths` and upload what could be read.
    ///
    /// Returns the per-document failures. If nothing could be extracted
    /// the first failure is returned as the error and the session is left
    /// untouched.
    pub fn upload_paths(&mut self, paths: &[PathBuf]) -> Result<Vec<Error>> {
        let report = extract::load_paths(paths);
        if report.documents.is_empty() {
            return report.into_documents().map(|_| Vec::new());
        }
        let extract::IngestReport {
            documents,
            failures,
        } = report;
        self.upload(documents)?;
        Ok(failures)
    }

    /// Remove a document by name. Returns whether it was present.
    pub fn remove_document(&mut self, name: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d.name != name);
        let removed = self.documents.len() != before;
        if removed {
            self.cache.mark_stale();
        }
        removed
    }

    /// Bring the index up to date with the document set, building it if
    /// needed. [`Error::NoDocuments`] if nothing has been uploaded.
    pub async fn ensure_index(&mut self) -> Result<&VectorIndex> {
        if self.documents.is_empty() {
            return Err(Error::NoDocuments);
        }
        let params = BuildParams::from_config(&self.config);
        self.cache
            .ensure_fresh(&self.documents, self.embedder.as_ref(), &params)
            .await
    }

    /// Answer `question` from the current documents and record the exchange.
    ///
    /// Ensures the index is fresh first, then retrieves the top-k chunks
    /// and composes the answer. On any error nothing is appended to the
    /// history.
    pub async fn ask(&mut self, question: &str) -> Result<Exchange> {
        let embedder = Arc::clone(&self.embedder);
        let top_k = self.config.retrieval.top_k;
        let index = self.ensure_index().await?;
        let chunks = retrieve(question, index, embedder.as_ref(), top_k).await?;

        let answer =
            answer::answer(question, &chunks, self.llm.as_ref(), self.config.llm.timeout()).await?;

        let model_name = self.llm.model_name().to_string();
        let source_documents = self.document_names();
        self.history
            .append(question, &answer.text, &model_name, &source_documents);

        Ok(Exchange {
            question: question.to_string(),
            answer,
            chunks,
            model_name,
            source_documents,
        })
    }

    /// Undo the last question/answer pair. Returns whether one was removed.
    pub fn undo(&mut self) -> bool {
        self.history.undo_last_pair()
    }

    pub fn export_csv(&self) -> Result<String> {
        self.history.to_csv()
    }

    /// Clear documents, history, the cached index and the persisted store.
    /// Idempotent.
    pub async fn reset(&mut self) -> Result<()> {
        self.cache.reset().await?;
        self.documents.clear();
        self.history.reset();
        tracing::info!("session reset");
        Ok(())
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document_names(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.name.clone()).collect()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn store(&self) -> &S {
        self.cache.store()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

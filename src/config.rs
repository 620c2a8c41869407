//! TOML configuration parsing and validation.
//!
//! ```toml
//! [store]
//! path = "./data/index.sqlite"
//!
//! [chunking]
//! chunk_size = 10000
//! overlap = 1000
//!
//! [retrieval]
//! top_k = 4
//!
//! [embedding]
//! provider = "gemini"
//! model = "models/embedding-001"
//! dims = 768
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-1.5-flash"
//! ```
//!
//! Every section has defaults, so an empty file is a valid (if
//! provider-less) configuration; both providers default to `disabled`.
//! `config/docchat.example.toml` carries the Gemini setup above. API keys
//! are never read from this file; providers take them from the environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Location of the persisted vector index.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/index.sqlite")
}

/// Character-window chunking parameters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> crate::Result<Self> {
        let cfg = Self {
            chunk_size,
            overlap,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunking.chunk_size must be > 0"));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunking.overlap ({}) must be less than chunking.chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between the starts of consecutive windows.
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap)
    }
}

fn default_chunk_size() -> usize {
    10_000
}
fn default_overlap() -> usize {
    1_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Deadline for embedding every chunk of a document set.
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// Deadline for a single completion, retries included.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_build_timeout_secs() -> u64 {
    600
}
fn default_temperature() -> f32 {
    0.3
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

impl Config {
    /// A validated configuration with every default and both providers disabled.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> crate::Result<()> {
        self.chunking.validate()?;

        if self.retrieval.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be >= 1"));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "gemini" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(Error::config(format!(
                    "unknown embedding provider '{}'; must be disabled, gemini, openai, ollama, or local",
                    other
                )))
            }
        }
        if self.embedding.is_enabled() && self.embedding.provider != "local" {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                return Err(Error::config(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.model.is_none() {
                return Err(Error::config(format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be > 0"));
        }

        match self.llm.provider.as_str() {
            "disabled" | "gemini" | "openai" | "ollama" => {}
            other => {
                return Err(Error::config(format!(
                    "unknown llm provider '{}'; must be disabled, gemini, openai, or ollama",
                    other
                )))
            }
        }
        if self.llm.is_enabled() && self.llm.model.is_none() {
            return Err(Error::config(format!(
                "llm.model must be specified when provider is '{}'",
                self.llm.provider
            )));
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

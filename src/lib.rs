//! # docchat
//!
//! Ask natural-language questions about a set of documents and get answers
//! grounded only in those documents, with a history of prior exchanges.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │  Extract  │──▶│  Chunk  │──▶│   Embed   │──▶│ Vector Index │──▶ SQLite file
//! │ PDF/OOXML │   │ windows │   │ provider  │   │ (cached)     │
//! └───────────┘   └─────────┘   └───────────┘   └──────┬───────┘
//!                                                      │ top-k
//!                  question ──▶ Embed ──▶ Retrieve ◀────┘
//!                                            │
//!                                            ▼
//!                                   Answer (LLM) ──▶ History ──▶ CSV
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat index ./papers                       # build and persist the index
//! docchat ask "What color is the sky?" --doc ./papers
//! docchat chat --doc ./papers                  # interactive, with :undo / :export
//! docchat reset                                # remove the persisted index
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | File and directory text extraction |
//! | [`chunk`] | Overlapping character-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language provider abstraction |
//! | [`index`] | Vector index build and search |
//! | [`store`] | Persisted index storage |
//! | [`cache`] | Index cache state machine |
//! | [`retrieve`] | Top-k retrieval |
//! | [`answer`] | Grounded prompt and answer composition |
//! | [`history`] | Conversation history and CSV export |
//! | [`session`] | The session tying it all together |
//! | [`logging`] | Tracing subscriber setup |

pub mod answer;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod history;
mod http;
pub mod index;
pub mod llm;
pub mod logging;
pub mod models;
pub mod retrieve;
pub mod session;
pub mod store;

pub use error::{Error, Result};

//! SQLite-file [`IndexStore`].
//!
//! # Layout
//!
//! ```sql
//! CREATE TABLE index_meta (
//!     dimension   INTEGER NOT NULL,
//!     count       INTEGER NOT NULL,
//!     model       TEXT    NOT NULL,
//!     fingerprint TEXT,
//!     built_at    INTEGER NOT NULL   -- unix seconds
//! );
//! CREATE TABLE entries (
//!     position INTEGER PRIMARY KEY,  -- insertion order, 0-based
//!     document TEXT    NOT NULL,
//!     ordinal  INTEGER NOT NULL,
//!     text     TEXT    NOT NULL,
//!     hash     TEXT    NOT NULL,
//!     vector   BLOB    NOT NULL,     -- little-endian f32 × dimension
//!     UNIQUE(document, ordinal)
//! );
//! ```
//!
//! # Atomic replace
//!
//! `persist` writes a complete database to `<file>.tmp-<uuid>` next to the
//! target, closes the pool, then renames the temp file over the target.
//! Rename within one directory is atomic, so a crash leaves either the old
//! file or the new one. Rollback journaling is used so the temp database
//! is a single self-contained file when it is renamed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::IndexStore;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{Chunk, IndexEntry};

/// Largest embedding width accepted from a stored header.
const MAX_DIMENSION: usize = 1 << 16;

/// Header of a persisted index, readable without loading the vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub dimension: usize,
    pub count: usize,
    pub model: String,
    pub fingerprint: Option<String>,
    pub built_at: chrono::DateTime<chrono::Utc>,
}

pub struct SqliteIndexStore {
    path: PathBuf,
}

impl SqliteIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(path: &Path, create: bool) -> Result<SqlitePool> {
        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .read_only(!create);
        if create {
            options = options.journal_mode(SqliteJournalMode::Delete);
        }

        Ok(SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?)
    }

    async fn open_existing(&self) -> Result<SqlitePool> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Err(Error::IndexNotFound(self.location()));
        }
        Self::open(&self.path, false)
            .await
            .map_err(|e| self.corrupt(e.to_string()))
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::corrupt(self.location(), reason)
    }

    /// Read the header row only.
    pub async fn meta(&self) -> Result<IndexMeta> {
        let pool = self.open_existing().await?;
        let meta = self.read_meta(&pool).await;
        pool.close().await;
        meta
    }

    async fn read_meta(&self, pool: &SqlitePool) -> Result<IndexMeta> {
        let row = sqlx::query(
            "SELECT dimension, count, model, fingerprint, built_at FROM index_meta",
        )
        .fetch_optional(pool)
        .await
        .map_err(|e| self.corrupt(format!("unreadable index_meta: {}", e)))?
        .ok_or_else(|| self.corrupt("index_meta is empty"))?;

        let dimension: i64 = row.try_get("dimension").map_err(|e| self.corrupt(e.to_string()))?;
        let count: i64 = row.try_get("count").map_err(|e| self.corrupt(e.to_string()))?;
        let built_at: i64 = row.try_get("built_at").map_err(|e| self.corrupt(e.to_string()))?;
        if count < 0 {
            return Err(self.corrupt("negative entry count"));
        }
        let dimension = usize::try_from(dimension)
            .ok()
            .filter(|d| *d <= MAX_DIMENSION)
            .ok_or_else(|| self.corrupt(format!("dimension {} out of range", dimension)))?;

        Ok(IndexMeta {
            dimension,
            count: count as usize,
            model: row.try_get("model").map_err(|e| self.corrupt(e.to_string()))?,
            fingerprint: row
                .try_get("fingerprint")
                .map_err(|e| self.corrupt(e.to_string()))?,
            built_at: chrono::DateTime::from_timestamp(built_at, 0)
                .ok_or_else(|| self.corrupt("invalid built_at"))?,
        })
    }

    async fn read_index(&self, pool: &SqlitePool) -> Result<VectorIndex> {
        let meta = self.read_meta(pool).await?;

        let rows = sqlx::query(
            "SELECT document, ordinal, text, hash, vector FROM entries ORDER BY position",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| self.corrupt(format!("unreadable entries: {}", e)))?;

        if rows.len() != meta.count {
            return Err(self.corrupt(format!(
                "header says {} entries, found {}",
                meta.count,
                rows.len()
            )));
        }

        let expected_bytes = meta
            .dimension
            .checked_mul(4)
            .ok_or_else(|| self.corrupt("dimension out of range"))?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.try_get("vector").map_err(|e| self.corrupt(e.to_string()))?;
            if blob.len() != expected_bytes {
                return Err(self.corrupt(format!(
                    "vector of {} bytes in a {}-dimension index",
                    blob.len(),
                    meta.dimension
                )));
            }
            let ordinal: i64 = row.try_get("ordinal").map_err(|e| self.corrupt(e.to_string()))?;
            let ordinal = u32::try_from(ordinal).map_err(|_| self.corrupt("ordinal out of range"))?;

            entries.push(IndexEntry {
                chunk: Chunk {
                    document: row.try_get("document").map_err(|e| self.corrupt(e.to_string()))?,
                    ordinal,
                    text: row.try_get("text").map_err(|e| self.corrupt(e.to_string()))?,
                    hash: row.try_get("hash").map_err(|e| self.corrupt(e.to_string()))?,
                },
                vector: blob_to_vec(&blob),
            });
        }

        let index = VectorIndex::from_entries(meta.dimension, meta.model, entries)
            .map_err(|e| self.corrupt(e.to_string()))?;
        Ok(match meta.fingerprint {
            Some(fp) => index.with_fingerprint(fp),
            None => index,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index.sqlite".to_string());
        self.path
            .with_file_name(format!("{}.tmp-{}", name, uuid::Uuid::new_v4()))
    }
}

async fn write_index(pool: &SqlitePool, index: &VectorIndex) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE index_meta (
            dimension INTEGER NOT NULL,
            count INTEGER NOT NULL,
            model TEXT NOT NULL,
            fingerprint TEXT,
            built_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE entries (
            position INTEGER PRIMARY KEY,
            document TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            vector BLOB NOT NULL,
            UNIQUE(document, ordinal)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO index_meta (dimension, count, model, fingerprint, built_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(index.dimension() as i64)
    .bind(index.len() as i64)
    .bind(index.model())
    .bind(index.fingerprint())
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    for (position, entry) in index.entries().iter().enumerate() {
        sqlx::query(
            "INSERT INTO entries (position, document, ordinal, text, hash, vector) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(position as i64)
        .bind(&entry.chunk.document)
        .bind(entry.chunk.ordinal as i64)
        .bind(&entry.chunk.text)
        .bind(&entry.chunk.hash)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.path).await?)
    }

    async fn persist(&self, index: &VectorIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        let written = async {
            let pool = Self::open(&tmp, true).await?;
            let result = write_index(&pool, index).await;
            pool.close().await;
            result
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::info!(
            location = %self.path.display(),
            entries = index.len(),
            dimension = index.dimension(),
            "persisted index"
        );
        Ok(())
    }

    async fn load(&self) -> Result<VectorIndex> {
        let pool = self.open_existing().await?;
        let index = self.read_index(&pool).await;
        pool.close().await;
        index
    }

    async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(location = %self.path.display(), "removed persisted index");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::hash_text;
    use tempfile::TempDir;

    fn sample_index() -> VectorIndex {
        let entries = ["alpha", "beta", "gamma"]
            .iter()
            .enumerate()
            .map(|(i, text)| IndexEntry {
                chunk: Chunk {
                    document: "greek.txt".to_string(),
                    ordinal: i as u32,
                    text: text.to_string(),
                    hash: hash_text(text),
                },
                vector: vec![i as f32, 1.0, -0.5],
            })
            .collect();
        VectorIndex::from_entries(3, "test-model", entries)
            .unwrap()
            .with_fingerprint("abc123")
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteIndexStore::new(tmp.path().join("none.sqlite"));
        assert!(matches!(store.load().await, Err(Error::IndexNotFound(_))));
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn persist_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteIndexStore::new(tmp.path().join("nested/dir/index.sqlite"));
        let index = sample_index();
        store.persist(&index).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.fingerprint(), Some("abc123"));

        let meta = store.meta().await.unwrap();
        assert_eq!(meta.dimension, 3);
        assert_eq!(meta.count, 3);
        assert_eq!(meta.model, "test-model");
    }

    #[tokio::test]
    async fn persist_replaces_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteIndexStore::new(tmp.path().join("index.sqlite"));
        store.persist(&sample_index()).await.unwrap();
        let smaller = VectorIndex::from_entries(2, "other", Vec::new()).unwrap();
        store.persist(&smaller).await.unwrap();

        assert_eq!(store.load().await.unwrap(), smaller);
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.sqlite".to_string()]);
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        std::fs::write(&path, b"this is not a database").unwrap();
        let store = SqliteIndexStore::new(&path);
        assert!(matches!(store.load().await, Err(Error::IndexCorrupt { .. })));
    }

    #[tokio::test]
    async fn count_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let store = SqliteIndexStore::new(&path);
        store.persist(&sample_index()).await.unwrap();

        let pool = SqliteIndexStore::open(&path, true).await.unwrap();
        sqlx::query("DELETE FROM entries WHERE position = 2")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::IndexCorrupt { .. }));
        assert!(err.to_string().contains("header says 3"));
    }

    #[tokio::test]
    async fn short_vector_blob_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let store = SqliteIndexStore::new(&path);
        store.persist(&sample_index()).await.unwrap();

        let pool = SqliteIndexStore::open(&path, true).await.unwrap();
        sqlx::query("UPDATE entries SET vector = ? WHERE position = 0")
            .bind(vec![0u8; 5])
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        assert!(matches!(store.load().await, Err(Error::IndexCorrupt { .. })));
    }

    #[tokio::test]
    async fn oversized_dimension_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let store = SqliteIndexStore::new(&path);
        store.persist(&sample_index()).await.unwrap();

        for dimension in [i64::MAX, -1, (MAX_DIMENSION as i64) + 1] {
            let pool = SqliteIndexStore::open(&path, true).await.unwrap();
            sqlx::query("UPDATE index_meta SET dimension = ?")
                .bind(dimension)
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;

            assert!(
                matches!(store.load().await, Err(Error::IndexCorrupt { .. })),
                "dimension {}",
                dimension
            );
            assert!(matches!(store.meta().await, Err(Error::IndexCorrupt { .. })));
        }
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteIndexStore::new(tmp.path().join("index.sqlite"));
        store.persist(&sample_index()).await.unwrap();
        store.remove().await.unwrap();
        store.remove().await.unwrap();
        assert!(matches!(store.load().await, Err(Error::IndexNotFound(_))));
    }
}

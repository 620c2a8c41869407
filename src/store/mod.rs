//! Persisted index storage.
//!
//! The [`IndexStore`] trait is the durable home of exactly one
//! [`VectorIndex`]: persist it whole, load it whole, remove it. Two
//! backends ship with the crate:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`SqliteIndexStore`] | [`sqlite`] | single SQLite file, replaced atomically on persist |
//! | [`InMemoryIndexStore`] | [`memory`] | tests; no filesystem access |
//!
//! Writers to the same location are serialized with [`LocationLock`].

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::index::VectorIndex;

pub use memory::InMemoryIndexStore;
pub use sqlite::SqliteIndexStore;

/// Durable storage for one serialized [`VectorIndex`].
///
/// # Contract
///
/// - `persist` replaces any prior content atomically: a reader sees
///   either the old index or the new one, never a mix.
/// - `load` fails with [`Error::IndexNotFound`](crate::Error::IndexNotFound)
///   when nothing is stored and
///   [`Error::IndexCorrupt`](crate::Error::IndexCorrupt) when the stored
///   data cannot be reconstructed.
/// - `remove` is idempotent.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Stable identifier of the location, used as the lock key.
    fn location(&self) -> String;

    async fn exists(&self) -> Result<bool>;

    async fn persist(&self, index: &VectorIndex) -> Result<()>;

    async fn load(&self) -> Result<VectorIndex>;

    async fn remove(&self) -> Result<()>;
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

static LOCATION_LOCKS: OnceLock<LockMap> = OnceLock::new();

/// Process-wide exclusive lock per store location.
///
/// The guard is held for a whole build + persist and released when it is
/// dropped, on success and on every error path alike.
pub struct LocationLock;

impl LocationLock {
    pub async fn acquire(location: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = lock_map();
            // An entry only the map refers to has no holder and no waiter.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(location.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

fn lock_map() -> std::sync::MutexGuard<'static, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    LOCATION_LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

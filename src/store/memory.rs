//! In-memory [`IndexStore`] for tests.
//!
//! Holds a clone of the last persisted index behind `std::sync::RwLock`.

use std::sync::RwLock;

use async_trait::async_trait;

use super::IndexStore;
use crate::error::{Error, Result};
use crate::index::VectorIndex;

pub struct InMemoryIndexStore {
    name: String,
    slot: RwLock<Option<VectorIndex>>,
}

impl InMemoryIndexStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: RwLock::new(None),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<VectorIndex>> {
        self.slot.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<VectorIndex>> {
        self.slot.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.read().is_some())
    }

    async fn persist(&self, index: &VectorIndex) -> Result<()> {
        *self.write() = Some(index.clone());
        Ok(())
    }

    async fn load(&self) -> Result<VectorIndex> {
        self.read()
            .clone()
            .ok_or_else(|| Error::IndexNotFound(self.location()))
    }

    async fn remove(&self) -> Result<()> {
        *self.write() = None;
        Ok(())
    }
}

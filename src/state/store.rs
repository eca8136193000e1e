//! Versioned entity storage
//!
//! The registry only needs atomic read-modify-write per id. Stores expose
//! that as a compare-and-swap on a version counter; the in-memory store is
//! the one shipped here.

use crate::error::{SettlementError, SettlementResult};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A stored value and the version it was written at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[async_trait]
pub trait EntityStore<T: Clone + Send + Sync + 'static>: Send + Sync {
    async fn load(&self, id: &str) -> SettlementResult<Option<Versioned<T>>>;

    /// Insert a new entity at version 1; fails if the id is taken
    async fn insert(&self, id: &str, value: T) -> SettlementResult<Versioned<T>>;

    /// Replace the entity if it is still at `expected_version`
    async fn store(
        &self,
        id: &str,
        expected_version: u64,
        value: T,
    ) -> SettlementResult<Versioned<T>>;

    async fn list(&self) -> SettlementResult<Vec<Versioned<T>>>;
}

/// DashMap-backed store
#[derive(Debug)]
pub struct InMemoryStore<T> {
    entries: DashMap<String, Versioned<T>>,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> EntityStore<T> for InMemoryStore<T> {
    async fn load(&self, id: &str) -> SettlementResult<Option<Versioned<T>>> {
        Ok(self.entries.get(id).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, id: &str, value: T) -> SettlementResult<Versioned<T>> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(existing) => Err(SettlementError::VersionConflict {
                entity_id: id.to_string(),
                expected: 0,
                found: existing.get().version,
            }),
            Entry::Vacant(slot) => {
                let stored = Versioned { version: 1, value };
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn store(
        &self,
        id: &str,
        expected_version: u64,
        value: T,
    ) -> SettlementResult<Versioned<T>> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut existing) => {
                let found = existing.get().version;
                if found != expected_version {
                    return Err(SettlementError::VersionConflict {
                        entity_id: id.to_string(),
                        expected: expected_version,
                        found,
                    });
                }
                let stored = Versioned {
                    version: found + 1,
                    value,
                };
                existing.insert(stored.clone());
                Ok(stored)
            }
            Entry::Vacant(_) => Err(SettlementError::VersionConflict {
                entity_id: id.to_string(),
                expected: expected_version,
                found: 0,
            }),
        }
    }

    async fn list(&self) -> SettlementResult<Vec<Versioned<T>>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store: InMemoryStore<u32> = InMemoryStore::new();
        let first = store.insert("a", 1).await.unwrap();
        assert_eq!(first.version, 1);

        assert!(matches!(
            store.insert("a", 2).await,
            Err(SettlementError::VersionConflict { found: 1, .. })
        ));

        let second = store.store("a", 1, 2).await.unwrap();
        assert_eq!(second.version, 2);

        // A writer holding the old version loses
        assert!(matches!(
            store.store("a", 1, 3).await,
            Err(SettlementError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            })
        ));
        assert_eq!(store.load("a").await.unwrap().unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_store_requires_existing_entity() {
        let store: InMemoryStore<u32> = InMemoryStore::new();
        assert!(store.store("missing", 1, 5).await.is_err());
        assert!(store.load("missing").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}

//! Group store trait and in-memory implementation
//!
//! The store is safe under concurrent access across distinct keys; same-key
//! exclusion is the lock coordinator's job, not the store's.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::correlation::CorrelationKey;
use crate::group::CorrelationGroup;
use crate::message::MessageEvent;

/// Errors that can occur in group store operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backing storage is unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored group data is malformed
    #[error("Invalid group data: {0}")]
    InvalidData(String),
}

/// Durable mapping from correlation key to buffered message group
///
/// Mutating methods (`append`, `clear`, `remove`) must only be called while
/// holding the key's lock.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Return the group for a key, creating an empty one when absent
    async fn get_or_create(&self, key: &CorrelationKey)
        -> Result<CorrelationGroup, StoreError>;

    /// Return the group for a key, if one exists
    async fn get(&self, key: &CorrelationKey) -> Result<Option<CorrelationGroup>, StoreError>;

    /// Append a message to the key's group and return the updated group
    async fn append(
        &self,
        key: &CorrelationKey,
        message: MessageEvent,
    ) -> Result<CorrelationGroup, StoreError>;

    /// Empty the key's group without removing it
    async fn clear(&self, key: &CorrelationKey) -> Result<(), StoreError>;

    /// Atomically detach and return the key's group
    ///
    /// A subsequent `get_or_create` for the same key starts a fresh group.
    async fn remove(&self, key: &CorrelationKey)
        -> Result<Option<CorrelationGroup>, StoreError>;

    /// Snapshot groups last modified longer than `max_age` ago
    ///
    /// Does not remove them; the caller removes under lock after deciding
    /// release versus discard.
    async fn sweep_expired(&self, max_age: Duration)
        -> Result<Vec<CorrelationGroup>, StoreError>;
}

/// In-memory group store over an insertion-ordered map
#[derive(Debug, Default)]
pub struct InMemoryGroupStore {
    groups: RwLock<IndexMap<String, CorrelationGroup>>,
}

impl InMemoryGroupStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live groups
    pub async fn len(&self) -> usize {
        self.groups.read().await.len()
    }

    /// Whether the store holds no groups
    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.is_empty()
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn get_or_create(
        &self,
        key: &CorrelationKey,
    ) -> Result<CorrelationGroup, StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .entry(key.as_str().to_string())
            .or_insert_with(|| CorrelationGroup::new(key.clone()));
        Ok(group.clone())
    }

    async fn get(&self, key: &CorrelationKey) -> Result<Option<CorrelationGroup>, StoreError> {
        Ok(self.groups.read().await.get(key.as_str()).cloned())
    }

    async fn append(
        &self,
        key: &CorrelationKey,
        message: MessageEvent,
    ) -> Result<CorrelationGroup, StoreError> {
        let mut groups = self.groups.write().await;
        let group = groups
            .entry(key.as_str().to_string())
            .or_insert_with(|| CorrelationGroup::new(key.clone()));
        group.append(message);
        Ok(group.clone())
    }

    async fn clear(&self, key: &CorrelationKey) -> Result<(), StoreError> {
        if let Some(group) = self.groups.write().await.get_mut(key.as_str()) {
            group.clear();
        }
        Ok(())
    }

    async fn remove(
        &self,
        key: &CorrelationKey,
    ) -> Result<Option<CorrelationGroup>, StoreError> {
        Ok(self.groups.write().await.shift_remove(key.as_str()))
    }

    async fn sweep_expired(
        &self,
        max_age: Duration,
    ) -> Result<Vec<CorrelationGroup>, StoreError> {
        let groups = self.groups.read().await;
        Ok(groups
            .values()
            .filter(|group| group.older_than(max_age))
            .cloned()
            .collect())
    }
}

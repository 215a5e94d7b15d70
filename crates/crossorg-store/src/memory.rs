//! In-process mapping store

use crate::document::MappingDocument;
use crate::error::StoreError;
use crate::record::IdentityRecord;
use crate::store::MappingStore;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Mapping store held entirely in memory
///
/// Not durable; used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MappingDocument>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Check if no record is held
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn get(&self, source_entity_id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.inner.read().await.get(source_entity_id).cloned())
    }

    async fn get_target_id(
        &self,
        source_entity_id: &str,
        target_org_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .get(source_entity_id)
            .and_then(|r| r.target_id(target_org_id))
            .map(str::to_string))
    }

    async fn upsert(
        &self,
        resource_type: &str,
        source_entity_id: &str,
        target_org_id: &str,
        target_entity_id: &str,
    ) -> Result<(), StoreError> {
        let mut doc = self.inner.write().await;
        if doc.upsert(resource_type, source_entity_id, target_org_id, target_entity_id) {
            doc.version += 1;
        }
        Ok(())
    }

    async fn remove(&self, source_entity_id: &str) -> Result<bool, StoreError> {
        let mut doc = self.inner.write().await;
        let removed = doc.remove(source_entity_id);
        if removed {
            doc.version += 1;
        }
        Ok(removed)
    }

    async fn remove_target(
        &self,
        source_entity_id: &str,
        target_org_id: &str,
    ) -> Result<bool, StoreError> {
        let mut doc = self.inner.write().await;
        let removed = doc.remove_target(source_entity_id, target_org_id);
        if removed {
            doc.version += 1;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.inner.read().await.records.values().cloned().collect())
    }
}

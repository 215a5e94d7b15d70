//! Mapping store contract

use crate::error::StoreError;
use crate::record::IdentityRecord;
use async_trait::async_trait;

/// Durable source-id -> per-target-id mapping
///
/// Implementations must survive process restarts. Callers guarantee a single
/// writer per `source_entity_id`.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Fetch the whole record for a source entity
    async fn get(&self, source_entity_id: &str) -> Result<Option<IdentityRecord>, StoreError>;

    /// Fetch the counterpart id in one target org
    async fn get_target_id(
        &self,
        source_entity_id: &str,
        target_org_id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Create the record if absent and add or overwrite the target entry
    async fn upsert(
        &self,
        resource_type: &str,
        source_entity_id: &str,
        target_org_id: &str,
        target_entity_id: &str,
    ) -> Result<(), StoreError>;

    /// Remove the whole record
    ///
    /// Returns whether a record existed.
    async fn remove(&self, source_entity_id: &str) -> Result<bool, StoreError>;

    /// Remove one target entry, dropping the record once empty
    ///
    /// Returns whether the entry existed.
    async fn remove_target(
        &self,
        source_entity_id: &str,
        target_org_id: &str,
    ) -> Result<bool, StoreError>;

    /// All records, ordered by source entity id
    async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError>;
}

//! In-memory form of the persisted mapping document
//!
//! Both stores mutate the same structure; only persistence differs.

use crate::record::IdentityRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whole mapping document, keyed by source entity id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MappingDocument {
    /// Bumped on every persisted mutation
    #[serde(default)]
    pub(crate) version: u64,
    #[serde(default)]
    pub(crate) records: BTreeMap<String, IdentityRecord>,
}

impl MappingDocument {
    pub(crate) fn get(&self, source_entity_id: &str) -> Option<&IdentityRecord> {
        self.records.get(source_entity_id)
    }

    /// Create the record if absent, then add or overwrite the target entry
    ///
    /// Returns `false` when the document already held exactly this mapping.
    pub(crate) fn upsert(
        &mut self,
        resource_type: &str,
        source_entity_id: &str,
        target_org_id: &str,
        target_entity_id: &str,
    ) -> bool {
        let record = self
            .records
            .entry(source_entity_id.to_string())
            .or_insert_with(|| IdentityRecord::new(resource_type, source_entity_id));

        if record.target_id(target_org_id) == Some(target_entity_id)
            && record.resource_type == resource_type
        {
            return false;
        }

        record.resource_type = resource_type.to_string();
        record
            .target_mappings
            .insert(target_org_id.to_string(), target_entity_id.to_string());
        record.updated_at = Utc::now();
        true
    }

    pub(crate) fn remove(&mut self, source_entity_id: &str) -> bool {
        self.records.remove(source_entity_id).is_some()
    }

    /// Drop one target entry; the record goes with its last entry
    pub(crate) fn remove_target(&mut self, source_entity_id: &str, target_org_id: &str) -> bool {
        let Some(record) = self.records.get_mut(source_entity_id) else {
            return false;
        };
        if record.target_mappings.remove(target_org_id).is_none() {
            return false;
        }
        if record.target_mappings.is_empty() {
            self.records.remove(source_entity_id);
        } else {
            record.updated_at = Utc::now();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_then_overwrites() {
        let mut doc = MappingDocument::default();
        assert!(doc.upsert("queue", "S", "orgA", "T1"));
        assert!(doc.upsert("queue", "S", "orgA", "T2"));
        assert!(!doc.upsert("queue", "S", "orgA", "T2"));

        let record = doc.get("S").unwrap();
        assert_eq!(record.target_id("orgA"), Some("T2"));
        assert_eq!(record.target_count(), 1);
    }

    #[test]
    fn remove_target_drops_empty_record() {
        let mut doc = MappingDocument::default();
        doc.upsert("queue", "S", "orgA", "T1");
        doc.upsert("queue", "S", "orgB", "T2");

        assert!(doc.remove_target("S", "orgA"));
        assert!(doc.get("S").is_some());
        assert!(!doc.remove_target("S", "orgA"));

        assert!(doc.remove_target("S", "orgB"));
        assert!(doc.get("S").is_none());
    }

    #[test]
    fn tolerates_missing_fields() {
        let doc: MappingDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc.version, 0);
        assert!(doc.records.is_empty());
    }
}

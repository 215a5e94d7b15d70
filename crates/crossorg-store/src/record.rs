//! Identity records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cross-org identity of one migrated entity
///
/// At most one record exists per `source_entity_id`, and `target_mappings`
/// holds at most one entry per target org.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Entity kind, e.g. `routing_queue`
    pub resource_type: String,
    /// Stable id in the source org
    pub source_entity_id: String,
    /// Target org id -> target entity id
    pub target_mappings: BTreeMap<String, String>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Create record with no target mappings yet
    #[must_use]
    pub fn new(resource_type: impl Into<String>, source_entity_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            source_entity_id: source_entity_id.into(),
            target_mappings: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Target entity id for an org, if migrated there
    #[inline]
    #[must_use]
    pub fn target_id(&self, target_org_id: &str) -> Option<&str> {
        self.target_mappings.get(target_org_id).map(String::as_str)
    }

    /// Number of target orgs holding a counterpart
    #[inline]
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.target_mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let mut record = IdentityRecord::new("routing_queue", "S");
        record.target_mappings.insert("orgA".into(), "T1".into());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["resourceType"], "routing_queue");
        assert_eq!(json["sourceEntityId"], "S");
        assert_eq!(json["targetMappings"]["orgA"], "T1");
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn target_lookup() {
        let mut record = IdentityRecord::new("routing_queue", "S");
        assert_eq!(record.target_id("orgA"), None);

        record.target_mappings.insert("orgA".into(), "T1".into());
        assert_eq!(record.target_id("orgA"), Some("T1"));
        assert_eq!(record.target_count(), 1);
    }
}

//! Snapshot-directory export system
//!
//! Serves exports previously written by the source-side exporter as
//! `<root>/<resourceType>/<sourceId>.tf.json`. Known resource types and their
//! reference metadata come from the settings catalog.

use crate::storage::CONFIG_SUFFIX;
use async_trait::async_trait;
use crossorg_core::{ExportError, ExportSystem, ExportedConfig, ResourceSchema};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Export system reading snapshot files
#[derive(Debug, Clone)]
pub struct SnapshotExportSystem {
    root: PathBuf,
    schemas: BTreeMap<String, ResourceSchema>,
}

impl SnapshotExportSystem {
    /// Create export system over `root` knowing `schemas`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, schemas: impl IntoIterator<Item = ResourceSchema>) -> Self {
        Self {
            root: root.into(),
            schemas: schemas.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    fn snapshot_path(&self, resource_type: &str, source_entity_id: &str) -> PathBuf {
        self.root
            .join(resource_type)
            .join(format!("{source_entity_id}{CONFIG_SUFFIX}"))
    }
}

#[async_trait]
impl ExportSystem for SnapshotExportSystem {
    fn resolve_schema(&self, resource_type: &str) -> Option<ResourceSchema> {
        self.schemas.get(resource_type).cloned()
    }

    async fn export_entity(
        &self,
        resource_type: &str,
        source_entity_id: &str,
    ) -> Result<ExportedConfig, ExportError> {
        if source_entity_id.contains(['/', '\\']) || source_entity_id.starts_with('.') {
            return Err(ExportError::NotFound {
                resource_type: resource_type.to_string(),
                id: source_entity_id.to_string(),
            });
        }

        let path = self.snapshot_path(resource_type, source_entity_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ExportError::NotFound {
                    resource_type: resource_type.to_string(),
                    id: source_entity_id.to_string(),
                })
            }
            Err(source) => return Err(ExportError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "read export snapshot");

        ExportedConfig::from_slice(&bytes).map_err(|source| ExportError::Malformed { path, source })
    }
}

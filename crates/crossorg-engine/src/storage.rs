//! File-backed target configuration storage
//!
//! Layout: `<root>/organizations/<orgId>/config/<sourceId>.tf.json`. The
//! `config` directory of an org is the engine's working directory for it.

use async_trait::async_trait;
use crossorg_core::{ConfigStorage, DeleteOutcome, ExportedConfig, StorageError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Suffix of stored configuration files
pub const CONFIG_SUFFIX: &str = ".tf.json";

/// One JSON file per (target org, source entity)
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    root: PathBuf,
}

impl FileConfigStorage {
    /// Create storage rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one stored configuration
    ///
    /// # Errors
    /// `StorageError::InvalidKey` when either id is not a plain file name.
    pub fn config_file(&self, target_org_id: &str, source_entity_id: &str) -> Result<PathBuf, StorageError> {
        check_key(target_org_id)?;
        check_key(source_entity_id)?;
        Ok(self
            .working_dir(target_org_id)
            .join(format!("{source_entity_id}{CONFIG_SUFFIX}")))
    }
}

fn check_key(key: &str) -> Result<(), StorageError> {
    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !key.contains(['/', '\\']) => Ok(()),
        _ => Err(StorageError::InvalidKey(key.to_string())),
    }
}

#[async_trait]
impl ConfigStorage for FileConfigStorage {
    fn working_dir(&self, target_org_id: &str) -> PathBuf {
        self.root
            .join("organizations")
            .join(target_org_id)
            .join("config")
    }

    async fn exists(&self, target_org_id: &str, source_entity_id: &str) -> Result<bool, StorageError> {
        let path = self.config_file(target_org_id, source_entity_id)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io_error(&path, e))
    }

    async fn write(
        &self,
        target_org_id: &str,
        source_entity_id: &str,
        config: &ExportedConfig,
    ) -> Result<(), StorageError> {
        let path = self.config_file(target_org_id, source_entity_id)?;
        let dir = self.working_dir(target_org_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io_error(&dir, e))?;

        let bytes = config.to_pretty_bytes()?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io_error(&path, e))?;
        tracing::info!(path = %path.display(), "wrote target configuration");
        Ok(())
    }

    async fn delete(&self, target_org_id: &str, source_entity_id: &str) -> Result<DeleteOutcome, StorageError> {
        let path = self.config_file(target_org_id, source_entity_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "deleted target configuration");
                Ok(DeleteOutcome::Removed)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "target configuration already absent");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(err) => Err(StorageError::io_error(&path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ExportedConfig {
        ExportedConfig::from_value(json!({ "resource": { "routing_queue": { "q": { "name": "Q" } } } }))
            .unwrap()
    }

    #[tokio::test]
    async fn write_exists_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileConfigStorage::new(dir.path());

        assert!(!storage.exists("orgA", "S").await.unwrap());
        storage.write("orgA", "S", &sample()).await.unwrap();
        assert!(storage.exists("orgA", "S").await.unwrap());

        let on_disk = dir.path().join("organizations/orgA/config/S.tf.json");
        let read = ExportedConfig::from_slice(&std::fs::read(&on_disk).unwrap()).unwrap();
        assert_eq!(read, sample());

        assert_eq!(storage.delete("orgA", "S").await.unwrap(), DeleteOutcome::Removed);
        assert_eq!(storage.delete("orgA", "S").await.unwrap(), DeleteOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileConfigStorage::new(dir.path());
        storage.write("orgA", "S", &sample()).await.unwrap();

        let updated = ExportedConfig::from_value(json!({ "resource": {} })).unwrap();
        storage.write("orgA", "S", &updated).await.unwrap();

        let path = storage.config_file("orgA", "S").unwrap();
        assert_eq!(ExportedConfig::from_slice(&std::fs::read(path).unwrap()).unwrap(), updated);
    }

    #[test]
    fn rejects_path_like_ids() {
        let storage = FileConfigStorage::new("/tmp/unused");
        for bad in ["../escape", "a/b", "..", "", "/abs"] {
            assert!(
                matches!(storage.config_file("orgA", bad), Err(StorageError::InvalidKey(_))),
                "{bad}"
            );
        }
        assert!(storage.config_file("orgA", "6da92528-0107-4816-963b-cee291c0596c").is_ok());
    }
}

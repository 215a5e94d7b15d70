//! JSON document store
//!
//! The whole mapping lives in one JSON document. Every mutation reads the
//! document, applies the change in memory and writes it back through a temp
//! file + rename. The document carries a `version`; a write only lands if the
//! on-disk version still matches the one that was read, otherwise the
//! mutation is replayed against the fresh document.
//!
//! Writers sharing one [`JsonFileStore`] are fully serialized. Across
//! processes the version check and the rename are two separate steps with no
//! file lock between them: a write landing in that window is overwritten.
//! Writes landing before the check are detected and replayed.

use crate::document::MappingDocument;
use crate::error::StoreError;
use crate::record::IdentityRecord;
use crate::store::MappingStore;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Durable mapping store backed by a single JSON file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes writers inside this process
    write_lock: Mutex<()>,
    max_attempts: u32,
}

impl JsonFileStore {
    /// Create store for the document at `path`
    ///
    /// The file is created on first write; a missing file reads as empty.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Bound the number of attempts when racing other writers
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Location of the document
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<MappingDocument, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => decode(&self.path, &bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MappingDocument::default()),
            Err(err) => Err(StoreError::io_error(&self.path, err)),
        }
    }

    /// Read-modify-write with optimistic version check
    ///
    /// `apply` returns whether it changed the document; unchanged documents
    /// are not rewritten.
    async fn mutate<F>(&self, mut apply: F) -> Result<bool, StoreError>
    where
        F: FnMut(&mut MappingDocument) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut doc = self.load().await?;
            let expected = doc.version;

            if !apply(&mut doc) {
                return Ok(false);
            }
            doc.version = expected + 1;

            match self.write_if_unchanged(doc, expected).await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_conflict() && attempt < self.max_attempts => {
                    tracing::warn!(
                        path = %self.path.display(),
                        attempt,
                        "identity document changed during write, replaying mutation"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn write_if_unchanged(
        &self,
        doc: MappingDocument,
        expected: u64,
    ) -> Result<(), StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist(&path, &doc, expected))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MappingStore for JsonFileStore {
    async fn get(&self, source_entity_id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.load().await?.get(source_entity_id).cloned())
    }

    async fn get_target_id(
        &self,
        source_entity_id: &str,
        target_org_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .load()
            .await?
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
        let changed = self
            .mutate(|doc| doc.upsert(resource_type, source_entity_id, target_org_id, target_entity_id))
            .await?;
        tracing::debug!(
            source = source_entity_id,
            target_org = target_org_id,
            changed,
            "identity mapping upserted"
        );
        Ok(())
    }

    async fn remove(&self, source_entity_id: &str) -> Result<bool, StoreError> {
        self.mutate(|doc| doc.remove(source_entity_id)).await
    }

    async fn remove_target(
        &self,
        source_entity_id: &str,
        target_org_id: &str,
    ) -> Result<bool, StoreError> {
        self.mutate(|doc| doc.remove_target(source_entity_id, target_org_id))
            .await
    }

    async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.load().await?.records.into_values().collect())
    }
}

fn decode(path: &Path, bytes: &[u8]) -> Result<MappingDocument, StoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(MappingDocument::default());
    }
    serde_json::from_slice(bytes).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn on_disk_version(path: &Path) -> Result<u64, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => decode(path, &bytes).map(|doc| doc.version),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(StoreError::io_error(path, err)),
    }
}

fn persist(path: &Path, doc: &MappingDocument, expected: u64) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io_error(dir, e))?;

    let bytes = serde_json::to_vec_pretty(doc).map_err(StoreError::Encode)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io_error(dir, e))?;
    tmp.write_all(&bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io_error(tmp.path(), e))?;

    let found = on_disk_version(path)?;
    if found != expected {
        return Err(StoreError::Conflict {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }

    tmp.persist(path)
        .map_err(|e| StoreError::io_error(path, e.error))?;
    Ok(())
}

//! External collaborator seams
//!
//! The orchestrator never talks to a cloud API or runs the apply tool itself;
//! it drives these traits:
//! - [`ExportSystem`]: schema lookup and entity export from the source org
//! - [`ApplyEngine`]: declarative apply and output retrieval
//! - [`ConfigStorage`]: per (target org, source entity) configuration unit

use crate::credentials::CredentialContext;
use crate::document::{DocumentError, ExportedConfig, ResourcePath};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Schema metadata for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Resource type name
    pub name: String,
    /// Dotted attribute paths known to hold foreign-entity ids
    #[serde(default)]
    pub ref_attrs: Vec<String>,
}

impl ResourceSchema {
    /// Schema with no reference metadata
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ref_attrs: Vec::new(),
        }
    }

    /// Declare reference attribute paths
    #[inline]
    #[must_use]
    pub fn with_ref_attrs<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ref_attrs = paths.into_iter().map(Into::into).collect();
        self
    }
}

/// Export failures
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Entity does not exist in the source org
    #[error("no '{resource_type}' entity with id {id} in source org")]
    NotFound { resource_type: String, id: String },

    /// IO error reading exported data
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Exported data is not a valid document
    #[error("malformed export {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },

    /// Backend-specific failure
    #[error("export backend error: {0}")]
    Backend(String),
}

/// Source-side schema and export system
#[async_trait]
pub trait ExportSystem: Send + Sync {
    /// Look up a resource type; `None` when unknown
    fn resolve_schema(&self, resource_type: &str) -> Option<ResourceSchema>;

    /// Export one entity as a configuration document
    async fn export_entity(
        &self,
        resource_type: &str,
        source_entity_id: &str,
    ) -> Result<ExportedConfig, ExportError>;
}

/// How the apply engine scopes an apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply only the addressed resource
    Targeted(ResourcePath),
    /// Reconcile the whole working directory; removed resources are destroyed
    Reconcile,
}

/// One apply invocation
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    /// Target-specific configuration directory
    pub working_dir: &'a Path,
    /// Scope of the apply
    pub mode: &'a ApplyMode,
    /// Credentials the engine must authenticate with
    pub credentials: &'a CredentialContext,
}

/// Output name -> value, as reported after apply
pub type OutputValues = BTreeMap<String, serde_json::Value>;

/// Apply engine failures
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Process could not be started
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited unsuccessfully
    #[error("'{command}' exited with {}: {stderr}", exit_label(.exit_code))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Process exceeded its time budget and was killed
    #[error("'{command}' timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    /// Output document could not be decoded
    #[error("malformed engine output: {0}")]
    MalformedOutput(#[source] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("status {c}"))
}

/// Declarative apply engine
#[async_trait]
pub trait ApplyEngine: Send + Sync {
    /// Initialise the working directory and apply it
    async fn apply(&self, request: ApplyRequest<'_>) -> Result<(), EngineError>;

    /// Read applied outputs from the working directory
    async fn outputs(
        &self,
        working_dir: &Path,
        credentials: &CredentialContext,
    ) -> Result<OutputValues, EngineError>;
}

/// Result of removing a stored configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// File existed and was removed
    Removed,
    /// Nothing was stored
    AlreadyAbsent,
}

/// Configuration storage failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error on a stored unit
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded
    #[error("failed to encode configuration: {0}")]
    Encode(#[from] DocumentError),

    /// Id cannot name a stored unit
    #[error("'{0}' cannot be used as a storage key")]
    InvalidKey(String),
}

impl StorageError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Target-side configuration storage
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Directory the apply engine runs in for a target org
    fn working_dir(&self, target_org_id: &str) -> PathBuf;

    /// Whether a configuration is stored for the entity
    async fn exists(&self, target_org_id: &str, source_entity_id: &str) -> Result<bool, StorageError>;

    /// Store (create or replace) the entity's configuration
    async fn write(
        &self,
        target_org_id: &str,
        source_entity_id: &str,
        config: &ExportedConfig,
    ) -> Result<(), StorageError>;

    /// Remove the entity's configuration
    async fn delete(
        &self,
        target_org_id: &str,
        source_entity_id: &str,
    ) -> Result<DeleteOutcome, StorageError>;
}

//! Testing utilities for the crossorg workspace
//!
//! In-memory fakes for the orchestrator's collaborators plus fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use crossorg_core::{
    ApplyEngine, ApplyMode, ApplyRequest, ConfigStorage, CredentialContext, Credentials, DeleteOutcome,
    EngineError, ExportError, ExportSystem, ExportedConfig, OutputValues, ResourceSchema, StorageError,
    TargetOrg,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn target_org(id: &str) -> TargetOrg {
    TargetOrg::new(
        id,
        format!("{id} display"),
        Credentials::new(format!("{id}-client"), format!("{id}-secret"), "us-east-1"),
    )
}

/// Export with a single `resource.<type>.<label>` entry
pub fn exported_config(resource_type: &str, label: &str, attributes: Value) -> ExportedConfig {
    ExportedConfig::from_value(json!({
        "resource": { resource_type: { label: attributes } }
    }))
    .unwrap()
}

/// Org id a fake working directory belongs to
fn org_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct FakeExportSystem {
    schemas: HashMap<String, ResourceSchema>,
    exports: HashMap<(String, String), ExportedConfig>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeExportSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: ResourceSchema) -> Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_export(mut self, resource_type: &str, id: &str, config: ExportedConfig) -> Self {
        self.schemas
            .entry(resource_type.to_string())
            .or_insert_with(|| ResourceSchema::new(resource_type));
        self.exports
            .insert((resource_type.to_string(), id.to_string()), config);
        self
    }

    pub fn failing_for(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn export_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExportSystem for FakeExportSystem {
    fn resolve_schema(&self, resource_type: &str) -> Option<ResourceSchema> {
        self.schemas.get(resource_type).cloned()
    }

    async fn export_entity(&self, resource_type: &str, source_entity_id: &str) -> Result<ExportedConfig, ExportError> {
        self.calls
            .lock()
            .unwrap()
            .push((resource_type.to_string(), source_entity_id.to_string()));
        if self.failing.contains(source_entity_id) {
            return Err(ExportError::Backend("source org unreachable".into()));
        }
        self.exports
            .get(&(resource_type.to_string(), source_entity_id.to_string()))
            .cloned()
            .ok_or_else(|| ExportError::NotFound {
                resource_type: resource_type.to_string(),
                id: source_entity_id.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedApply {
    pub org: String,
    pub mode: ApplyMode,
    pub credentials: CredentialContext,
}

/// Apply engine answering from a script keyed by target org
#[derive(Default)]
pub struct ScriptedApplyEngine {
    outputs: Mutex<HashMap<String, OutputValues>>,
    failing: HashSet<String>,
    applies: Mutex<Vec<RecordedApply>>,
}

impl ScriptedApplyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `value` under `key` after applying in `org`
    pub fn with_output(self, org: &str, key: &str, value: &str) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .entry(org.to_string())
            .or_default()
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn failing_in(mut self, org: &str) -> Self {
        self.failing.insert(org.to_string());
        self
    }

    pub fn applies(&self) -> Vec<RecordedApply> {
        self.applies.lock().unwrap().clone()
    }

    pub fn applied_orgs(&self) -> Vec<String> {
        self.applies().into_iter().map(|a| a.org).collect()
    }
}

#[async_trait]
impl ApplyEngine for ScriptedApplyEngine {
    async fn apply(&self, request: ApplyRequest<'_>) -> Result<(), EngineError> {
        let org = org_of(request.working_dir);
        self.applies.lock().unwrap().push(RecordedApply {
            org: org.clone(),
            mode: request.mode.clone(),
            credentials: request.credentials.clone(),
        });
        if self.failing.contains(&org) {
            return Err(EngineError::Failed {
                command: "tofu apply".into(),
                exit_code: Some(1),
                stderr: format!("apply rejected in {org}"),
            });
        }
        Ok(())
    }

    async fn outputs(&self, working_dir: &Path, _credentials: &CredentialContext) -> Result<OutputValues, EngineError> {
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(&org_of(working_dir))
            .cloned()
            .unwrap_or_default())
    }
}

/// Configuration storage held in memory
#[derive(Default)]
pub struct MemoryConfigStorage {
    files: Mutex<BTreeMap<(String, String), ExportedConfig>>,
}

impl MemoryConfigStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stored(self, org: &str, source_id: &str, config: ExportedConfig) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert((org.to_string(), source_id.to_string()), config);
        self
    }

    pub fn stored(&self, org: &str, source_id: &str) -> Option<ExportedConfig> {
        self.files
            .lock()
            .unwrap()
            .get(&(org.to_string(), source_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ConfigStorage for MemoryConfigStorage {
    fn working_dir(&self, target_org_id: &str) -> PathBuf {
        PathBuf::from("memory").join(target_org_id)
    }

    async fn exists(&self, target_org_id: &str, source_entity_id: &str) -> Result<bool, StorageError> {
        Ok(self.stored(target_org_id, source_entity_id).is_some())
    }

    async fn write(&self, target_org_id: &str, source_entity_id: &str, config: &ExportedConfig) -> Result<(), StorageError> {
        self.files.lock().unwrap().insert(
            (target_org_id.to_string(), source_entity_id.to_string()),
            config.clone(),
        );
        Ok(())
    }

    async fn delete(&self, target_org_id: &str, source_entity_id: &str) -> Result<DeleteOutcome, StorageError> {
        let removed = self
            .files
            .lock()
            .unwrap()
            .remove(&(target_org_id.to_string(), source_entity_id.to_string()));
        Ok(if removed.is_some() {
            DeleteOutcome::Removed
        } else {
            DeleteOutcome::AlreadyAbsent
        })
    }
}

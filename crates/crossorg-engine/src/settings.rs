//! `crossorg.toml` settings
//!
//! ```toml
//! store_path = "state/identity-map.json"
//! config_root = "state"
//! snapshot_dir = "exports"
//!
//! [engine]
//! binary = "tofu"
//! timeout_secs = 900
//!
//! [credentials]
//! mode = "per-call"
//!
//! [resolver]
//! strategy = "auto"
//!
//! [mapping]
//! delete_policy = "whole-record"
//!
//! [[resource_types]]
//! name = "routing_queue"
//! ref_attrs = ["skill_ids", "wrapup_codes"]
//! ```

use crossorg_core::{
    CredentialEnvVars, CredentialMode, DeletePolicy, OrchestratorOptions, ResolverStrategy, ResourceSchema,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "crossorg.toml";

/// Settings and roster loading errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML for [`Settings`]
    #[error("invalid settings in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Roster file is not valid YAML for the roster
    #[error("invalid org roster in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Content parsed but violates a rule
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

impl SettingsError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Apply engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Executable name or path
    pub binary: PathBuf,
    /// Per-invocation time limit
    pub timeout_secs: Option<u64>,
    /// Extra `init` arguments
    pub extra_init_args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(crate::tofu::DEFAULT_BINARY),
            timeout_secs: None,
            extra_init_args: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Time limit as a duration
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Credential delivery settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// Delivery mode
    pub mode: CredentialMode,
    /// Environment variable names
    #[serde(flatten)]
    pub vars: CredentialEnvVars,
}

/// Resolver settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverSettings {
    /// Extraction strategy
    pub strategy: ResolverStrategy,
}

/// Mapping store settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingSettings {
    /// What a delete removes
    pub delete_policy: DeletePolicy,
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Identity mapping document
    pub store_path: PathBuf,
    /// Root of target configuration storage
    pub config_root: PathBuf,
    /// Root of export snapshots
    pub snapshot_dir: PathBuf,
    /// Apply engine
    pub engine: EngineSettings,
    /// Credential delivery
    pub credentials: CredentialSettings,
    /// Reference resolution
    pub resolver: ResolverSettings,
    /// Mapping updates
    pub mapping: MappingSettings,
    /// Known resource types
    pub resource_types: Vec<ResourceSchema>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("state/identity-map.json"),
            config_root: PathBuf::from("state"),
            snapshot_dir: PathBuf::from("exports"),
            engine: EngineSettings::default(),
            credentials: CredentialSettings::default(),
            resolver: ResolverSettings::default(),
            mapping: MappingSettings::default(),
            resource_types: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings
    ///
    /// An explicit path must exist. Without one, `crossorg.toml` in the
    /// current directory is used when present, defaults otherwise. Relative
    /// paths are resolved against the settings file's directory.
    ///
    /// # Errors
    /// IO and parse failures, duplicate resource type names.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if !candidate.exists() {
                    tracing::debug!("no settings file, using defaults");
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|e| SettingsError::io_error(&path, e))?;
        let mut settings = Self::from_toml(&text, &path)?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        settings.resolve_paths(base);
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Parse settings text; `origin` names it in errors
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text).map_err(|source| SettingsError::Toml {
            path: origin.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = std::collections::HashSet::new();
        for schema in &self.resource_types {
            if schema.name.is_empty() {
                return Err(SettingsError::Invalid {
                    what: "settings",
                    reason: "resource type with empty name".into(),
                });
            }
            if !seen.insert(schema.name.as_str()) {
                return Err(SettingsError::Invalid {
                    what: "settings",
                    reason: format!("resource type '{}' declared twice", schema.name),
                });
            }
        }
        Ok(())
    }

    /// Make relative paths relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.store_path, &mut self.config_root, &mut self.snapshot_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Orchestrator options these settings select
    #[must_use]
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            resolver_strategy: self.resolver.strategy,
            delete_policy: self.mapping.delete_policy,
            credential_mode: self.credentials.mode,
            credential_vars: self.credentials.vars.clone(),
        }
    }
}

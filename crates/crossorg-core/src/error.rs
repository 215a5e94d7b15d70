//! Migration error taxonomy and diagnostics
//!
//! Every hard failure is a [`MigrationError`]; callers see them, together
//! with warnings, as [`Diagnostic`] entries in a [`Diagnostics`] collection.

use crate::collaborators::{EngineError, ExportError, StorageError};
use crate::credentials::CredentialError;
use crate::document::DocumentError;
use crossorg_store::StoreError;
use serde::Serialize;
use std::error::Error as StdError;

/// Hard migration failures
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Resource type unknown to the export system
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),

    /// Source export failed
    #[error("export of {resource_type} {source_entity_id} failed: {source}")]
    ExportFailed {
        resource_type: String,
        source_entity_id: String,
        #[source]
        source: ExportError,
    },

    /// Resource address could not be located in the export
    #[error("resource path not found: {0}")]
    ResourcePathNotFound(#[source] DocumentError),

    /// Mapping store read failed while resolving a reference
    #[error("failed to resolve reference {reference} for org {target_org}: {source}")]
    ReferenceResolutionFailed {
        reference: String,
        target_org: String,
        #[source]
        source: StoreError,
    },

    /// Resolved document could not be rebuilt
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Target configuration could not be written or removed
    #[error("configuration write failed for org {target_org}: {source}")]
    ConfigWriteFailed {
        target_org: String,
        #[source]
        source: StorageError,
    },

    /// Apply engine exited unsuccessfully or timed out
    #[error("apply failed for org {target_org}: {source}")]
    ApplyEngineFailed {
        target_org: String,
        #[source]
        source: EngineError,
    },

    /// Applied outputs lack the captured id
    #[error("output '{key}' not found after apply in org {target_org}")]
    OutputNotFound { target_org: String, key: String },

    /// Mapping store update failed
    #[error("mapping store update failed for org {target_org}: {source}")]
    MappingStoreWriteFailed {
        target_org: String,
        #[source]
        source: StoreError,
    },

    /// Target credentials could not be put in place
    #[error("could not acquire credentials for org {target_org}: {source}")]
    CredentialAcquireFailed {
        target_org: String,
        #[source]
        source: CredentialError,
    },

    /// Prior credential context could not be restored
    ///
    /// Only ever reported as a warning.
    #[error("credential restore failed after org {target_org}: {source}")]
    CredentialRestoreFailed {
        target_org: String,
        #[source]
        source: CredentialError,
    },
}

impl MigrationError {
    /// Short machine-friendly kind name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownResourceType(_) => "UnknownResourceType",
            Self::ExportFailed { .. } => "ExportFailed",
            Self::ResourcePathNotFound(_) => "ResourcePathNotFound",
            Self::ReferenceResolutionFailed { .. } => "ReferenceResolutionFailed",
            Self::Document(_) => "Document",
            Self::ConfigWriteFailed { .. } => "ConfigWriteFailed",
            Self::ApplyEngineFailed { .. } => "ApplyEngineFailed",
            Self::OutputNotFound { .. } => "OutputNotFound",
            Self::MappingStoreWriteFailed { .. } => "MappingStoreWriteFailed",
            Self::CredentialAcquireFailed { .. } => "CredentialAcquireFailed",
            Self::CredentialRestoreFailed { .. } => "CredentialRestoreFailed",
        }
    }

    /// Target org the failure belongs to, if target-scoped
    #[must_use]
    pub fn target_org(&self) -> Option<&str> {
        match self {
            Self::ReferenceResolutionFailed { target_org, .. }
            | Self::ConfigWriteFailed { target_org, .. }
            | Self::ApplyEngineFailed { target_org, .. }
            | Self::OutputNotFound { target_org, .. }
            | Self::MappingStoreWriteFailed { target_org, .. }
            | Self::CredentialAcquireFailed { target_org, .. }
            | Self::CredentialRestoreFailed { target_org, .. } => Some(target_org),
            _ => None,
        }
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recorded; processing continues
    Warning,
    /// Halts the migration
    Error,
}

/// One user-visible finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// One-line summary
    pub summary: String,
    /// Cause chain, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Target org the finding belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_org: Option<String>,
}

impl Diagnostic {
    /// Warning with a summary
    #[must_use]
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: None,
            target_org: None,
        }
    }

    /// Error with a summary
    #[must_use]
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::warning(summary)
        }
    }

    /// Error diagnostic carrying the failure and its cause chain
    #[must_use]
    pub fn from_error(err: &MigrationError) -> Self {
        Self {
            severity: Severity::Error,
            summary: format!("{}: {err}", err.kind()),
            detail: cause_chain(err),
            target_org: err.target_org().map(str::to_string),
        }
    }

    /// Same finding at warning level
    #[inline]
    #[must_use]
    pub fn into_warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    /// Attach detail text
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the target org
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target_org: impl Into<String>) -> Self {
        self.target_org = Some(target_org.into());
        self
    }

    /// Check if this is an error
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

fn cause_chain(err: &MigrationError) -> Option<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    (!causes.is_empty()).then(|| causes.join(": "))
}

/// Ordered collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Create empty collection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    /// Check if any error-level entry is present
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Error-level entries
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    /// Warning-level entries
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    /// All entries in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_error_keeps_cause_chain() {
        let err = MigrationError::ApplyEngineFailed {
            target_org: "orgA".into(),
            source: EngineError::Failed {
                command: "tofu apply".into(),
                exit_code: Some(1),
                stderr: "quota exceeded".into(),
            },
        };
        let diag = Diagnostic::from_error(&err);

        assert!(diag.is_error());
        assert!(diag.summary.starts_with("ApplyEngineFailed"));
        assert_eq!(diag.target_org.as_deref(), Some("orgA"));
        assert!(diag.detail.unwrap().contains("quota exceeded"));
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("file already absent").with_target("orgA"));
        assert!(!diags.has_errors());

        diags.push(Diagnostic::error("boom"));
        assert!(diags.has_errors());
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn serializes_as_plain_list() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("w"));
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json, serde_json::json!([{ "severity": "warning", "summary": "w" }]));
    }

    #[test]
    fn untargeted_errors_have_no_org() {
        let err = MigrationError::UnknownResourceType("routing_queue".into());
        assert_eq!(err.target_org(), None);
        assert_eq!(Diagnostic::from_error(&err).detail, None);
    }
}

//! Requests, orchestrator states and reports

use crate::error::{Diagnostics, MigrationError};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Requested change to the source entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Create or update in every target
    CreateOrUpdate,
    /// Remove from every target
    Delete,
}

impl Operation {
    /// Check if this is a delete
    #[inline]
    #[must_use]
    pub fn is_delete(self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateOrUpdate => "create-or-update",
            Self::Delete => "delete",
        })
    }
}

/// One migration invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    /// Entity kind
    pub resource_type: String,
    /// Entity id in the source org
    pub source_entity_id: String,
    /// Requested change
    pub operation: Operation,
}

impl MigrationRequest {
    /// Create or update request
    #[must_use]
    pub fn create_or_update(resource_type: impl Into<String>, source_entity_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            source_entity_id: source_entity_id.into(),
            operation: Operation::CreateOrUpdate,
        }
    }

    /// Delete request
    #[must_use]
    pub fn delete(resource_type: impl Into<String>, source_entity_id: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            ..Self::create_or_update(resource_type, source_entity_id)
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    /// Resolving the resource type
    Init,
    /// Exporting from the source org
    Export,
    /// Locating the resource inside the export
    ParseResourcePath,
    /// Adding the output declaration
    Annotate,
    /// Processing target orgs in order
    ApplyTargets,
    /// Every target processed
    Done,
    /// Stopped on a hard failure
    Failed,
}

impl MigrationState {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: MigrationState) -> Vec<MigrationState> {
    use MigrationState::*;
    match from {
        Init => vec![Export, ApplyTargets, Failed],
        Export => vec![ParseResourcePath, Failed],
        ParseResourcePath => vec![Annotate, Failed],
        Annotate => vec![ApplyTargets, Failed],
        ApplyTargets => vec![Done, Failed],
        Done => vec![],
        Failed => vec![],
    }
}

/// Illegal orchestrator transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal migration state transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// Current state
    pub from: MigrationState,
    /// Requested state
    pub to: MigrationState,
}

/// Validate a state transition
pub fn validate_transition(from: MigrationState, to: MigrationState) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// How a delete updates the mapping store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletePolicy {
    /// Remove the whole record after each target's delete
    #[default]
    WholeRecord,
    /// Remove only the deleted target's entry
    PerTarget,
}

/// What happened in one target org
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TargetOutcome {
    /// Created or updated; mapping recorded
    Migrated {
        /// Id assigned in the target org
        target_entity_id: String,
    },
    /// Deleted; mapping removed
    Deleted,
    /// Stopped this migration
    Failed {
        /// Failure kind
        kind: String,
    },
}

/// Per-target result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetResult {
    /// Target org id
    pub target_org: String,
    /// Outcome
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

impl TargetResult {
    pub(crate) fn failed(target_org: &str, err: &MigrationError) -> Self {
        Self {
            target_org: target_org.to_string(),
            outcome: TargetOutcome::Failed {
                kind: err.kind().to_string(),
            },
        }
    }
}

/// Everything a caller learns about one migration
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// The request
    pub request: MigrationRequest,
    /// Final state
    pub state: MigrationState,
    /// States visited, in order
    pub trail: Vec<MigrationState>,
    /// Targets attempted, in order
    pub targets: Vec<TargetResult>,
    /// Warnings and errors
    pub diagnostics: Diagnostics,
}

impl MigrationReport {
    pub(crate) fn new(request: MigrationRequest) -> Self {
        Self {
            request,
            state: MigrationState::Init,
            trail: vec![MigrationState::Init],
            targets: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Record a transition
    pub(crate) fn advance(&mut self, to: MigrationState) {
        if let Err(err) = validate_transition(self.state, to) {
            tracing::error!(error = %err, "unexpected migration state transition");
        }
        tracing::info!(from = ?self.state, to = ?to, "migration state");
        self.state = to;
        self.trail.push(to);
    }

    /// Check if any error was recorded
    ///
    /// A report with errors means the request failed, even if earlier targets
    /// succeeded.
    #[inline]
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Check if the migration reached `Done` without errors
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == MigrationState::Done && !self.has_errors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_path_is_allowed() {
        use MigrationState::*;
        let path = [Init, Export, ParseResourcePath, Annotate, ApplyTargets, Done];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn delete_skips_export() {
        use MigrationState::*;
        assert!(validate_transition(Init, ApplyTargets).is_ok());
        assert!(validate_transition(Init, Annotate).is_err());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in [MigrationState::Done, MigrationState::Failed] {
            assert!(state.is_terminal());
            assert!(allowed_transitions(state).is_empty());
        }
    }

    #[test]
    fn every_non_terminal_state_can_fail() {
        use MigrationState::*;
        for state in [Init, Export, ParseResourcePath, Annotate, ApplyTargets] {
            assert!(allowed_transitions(state).contains(&Failed));
        }
    }

    #[test]
    fn delete_request_builder() {
        let req = MigrationRequest::delete("routing_queue", "S");
        assert!(req.operation.is_delete());
        assert_eq!(req.operation.to_string(), "delete");
    }
}

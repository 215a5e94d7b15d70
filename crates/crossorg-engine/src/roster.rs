//! Org roster (`orgs.yml`)
//!
//! ```yaml
//! source:
//!   orgId: 0b8c...
//!   orgName: Production
//!   clientId: ...
//!   clientSecret: ...
//!   region: us-east-1
//! targets:
//!   - orgId: 7f21...
//!     orgName: Staging
//!     clientId: ...
//!     clientSecret: ...
//!     region: eu-west-1
//! ```

use crate::settings::SettingsError;
use crossorg_core::TargetOrg;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Default roster file
pub const DEFAULT_ROSTER_FILE: &str = "orgs.yml";

/// Source org and ordered target orgs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrgRoster {
    /// Org entities are exported from
    pub source: TargetOrg,
    /// Orgs migrated to, in processing order
    pub targets: Vec<TargetOrg>,
}

impl OrgRoster {
    /// Read and validate a roster file
    ///
    /// # Errors
    /// IO, YAML and validation failures.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|e| SettingsError::io_error(path, e))?;
        let roster = Self::from_yaml(&text, path)?;
        tracing::debug!(path = %path.display(), targets = roster.targets.len(), "org roster loaded");
        Ok(roster)
    }

    /// Parse roster text; `origin` names it in errors
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, SettingsError> {
        let roster: Self = serde_yaml::from_str(text).map_err(|source| SettingsError::Yaml {
            path: origin.to_path_buf(),
            source,
        })?;
        roster.validate()?;
        Ok(roster)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |reason: String| SettingsError::Invalid {
            what: "org roster",
            reason,
        };
        if self.targets.is_empty() {
            return Err(invalid("no target orgs listed".into()));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.id.is_empty() {
                return Err(invalid("target with empty orgId".into()));
            }
            if !seen.insert(target.id.as_str()) {
                return Err(invalid(format!("target org '{}' listed twice", target.id)));
            }
            if target.id == self.source.id {
                tracing::warn!(org = %target.id, "source org is also listed as a target");
            }
        }
        Ok(())
    }

    /// Targets restricted to `ids`, in roster order; all when `ids` is empty
    ///
    /// # Errors
    /// `SettingsError::Invalid` naming an id the roster does not list.
    pub fn select(&self, ids: &[String]) -> Result<Vec<TargetOrg>, SettingsError> {
        if ids.is_empty() {
            return Ok(self.targets.clone());
        }
        if let Some(unknown) = ids.iter().find(|id| !self.targets.iter().any(|t| &t.id == *id)) {
            return Err(SettingsError::Invalid {
                what: "target selection",
                reason: format!("org '{unknown}' is not in the roster"),
            });
        }
        Ok(self
            .targets
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ROSTER: &str = r"
source:
  orgId: src
  orgName: Production
  clientId: src-client
  clientSecret: src-secret
  region: us-east-1
targets:
  - orgId: orgA
    orgName: Staging
    clientId: a-client
    clientSecret: a-secret
    region: eu-west-1
  - orgId: orgB
    orgName: Dev
    clientId: b-client
    clientSecret: b-secret
    region: ap-southeast-2
";

    fn parse(text: &str) -> Result<OrgRoster, SettingsError> {
        OrgRoster::from_yaml(text, Path::new("orgs.yml"))
    }

    #[test]
    fn parses_roster_in_order() {
        let roster = parse(ROSTER).unwrap();
        assert_eq!(roster.source.name, "Production");
        let ids: Vec<&str> = roster.targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["orgA", "orgB"]);
        assert_eq!(roster.targets[1].credentials.client_secret, "b-secret");
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let text = ROSTER.replace("orgId: orgB", "orgId: orgA");
        assert!(matches!(parse(&text), Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn empty_target_list_is_rejected() {
        let text = "source:\n  orgId: s\n  clientId: c\n  clientSecret: x\n  region: r\ntargets: []\n";
        assert!(matches!(parse(text), Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn missing_credentials_are_a_yaml_error() {
        let text = "source:\n  orgId: s\ntargets: []\n";
        assert!(matches!(parse(text), Err(SettingsError::Yaml { .. })));
    }

    #[test]
    fn selection_keeps_roster_order() {
        let roster = parse(ROSTER).unwrap();
        let picked = roster.select(&["orgB".into(), "orgA".into()]).unwrap();
        assert_eq!(picked[0].id, "orgA");
        assert!(roster.select(&["orgZ".into()]).is_err());
        assert_eq!(roster.select(&[]).unwrap().len(), 2);
    }
}

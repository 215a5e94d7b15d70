//! Reference resolution
//!
//! Rewrites ids of already-migrated entities inside an exported document so
//! the copy is valid for one target org. Candidate ids come from a
//! [`ReferenceExtractor`]:
//!
//! - [`PatternScan`] scans the whole serialized document for id-shaped tokens.
//!   Needs no metadata but may pick up ids that only appear in free text.
//! - [`DeclaredPaths`] walks attribute paths the schema declares as
//!   references. Precise, but only as complete as the metadata.
//!
//! Substitution itself is global: every occurrence of a mapped id is replaced
//! in one pass over the serialized document.

use crate::collaborators::ResourceSchema;
use crate::document::{DocumentError, ExportedConfig, ResourcePath};
use crate::error::{Diagnostic, MigrationError};
use crossorg_store::MappingStore;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

/// Canonical 8-4-4-4-12 hexadecimal entity id
static ENTITY_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("entity id pattern compiles")
});

/// Check whether `s` is exactly one entity id
#[must_use]
pub fn is_entity_id(s: &str) -> bool {
    ENTITY_ID
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

/// Finds candidate foreign references in a document
pub trait ReferenceExtractor: Send + Sync + Debug {
    /// Distinct candidate ids, in first-seen order
    ///
    /// The document passed in has its output section detached.
    fn extract(&self, config: &ExportedConfig, path: &ResourcePath) -> Vec<String>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Whole-document scan for id-shaped tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternScan;

impl ReferenceExtractor for PatternScan {
    fn extract(&self, config: &ExportedConfig, _path: &ResourcePath) -> Vec<String> {
        let Ok(text) = config.to_json_string() else {
            return Vec::new();
        };
        dedupe(ENTITY_ID.find_iter(&text).map(|m| m.as_str().to_string()))
    }

    fn name(&self) -> &'static str {
        "scan"
    }
}

/// Walk of declared reference attribute paths
///
/// Each path is dotted (`routing.skill_ids`) and is resolved from the
/// addressed resource's attribute tree. Lists met along the way fan out over
/// their elements; the value at the end of a path contributes a string or
/// every string of a list.
#[derive(Debug, Clone, Default)]
pub struct DeclaredPaths {
    ref_attrs: Vec<String>,
}

impl DeclaredPaths {
    /// Create extractor for the given paths
    #[must_use]
    pub fn new(ref_attrs: Vec<String>) -> Self {
        Self { ref_attrs }
    }
}

impl ReferenceExtractor for DeclaredPaths {
    fn extract(&self, config: &ExportedConfig, path: &ResourcePath) -> Vec<String> {
        let Some(attributes) = config.resource_attributes(path) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for attr in &self.ref_attrs {
            let segments: Vec<&str> = attr.split('.').filter(|s| !s.is_empty()).collect();
            collect_at(attributes, &segments, &mut found);
        }
        dedupe(found)
    }

    fn name(&self) -> &'static str {
        "declared"
    }
}

fn collect_at(value: &Value, segments: &[&str], found: &mut Vec<String>) {
    match (value, segments.split_first()) {
        (Value::Array(items), _) => {
            for item in items {
                collect_at(item, segments, found);
            }
        }
        (Value::Object(map), Some((head, rest))) => {
            if let Some(next) = map.get(*head) {
                collect_at(next, rest, found);
            }
        }
        (Value::String(s), None) if !s.is_empty() => found.push(s.clone()),
        _ => {}
    }
}

fn dedupe(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Which extractor a resource type gets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverStrategy {
    /// Declared paths when the schema has them, scan otherwise
    #[default]
    Auto,
    /// Always scan
    Scan,
    /// Always declared paths; types without metadata resolve nothing
    Declared,
}

impl ResolverStrategy {
    /// Extractor for one resource type
    #[must_use]
    pub fn extractor_for(self, schema: &ResourceSchema) -> Box<dyn ReferenceExtractor> {
        match self {
            Self::Scan => Box::new(PatternScan),
            Self::Declared => Box::new(DeclaredPaths::new(schema.ref_attrs.clone())),
            Self::Auto if schema.ref_attrs.is_empty() => Box::new(PatternScan),
            Self::Auto => Box::new(DeclaredPaths::new(schema.ref_attrs.clone())),
        }
    }
}

/// Target-specific copy of a document
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Rewritten document
    pub config: ExportedConfig,
    /// Old id -> new id, for every substitution made
    pub rewritten: BTreeMap<String, String>,
    /// Unmapped references left in place
    pub warnings: Vec<Diagnostic>,
}

/// Rewrites references using the identity mapping
#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn MappingStore>,
}

impl Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver").finish_non_exhaustive()
    }
}

impl ReferenceResolver {
    /// Create resolver over a mapping store
    #[must_use]
    pub fn new(store: Arc<dyn MappingStore>) -> Self {
        Self { store }
    }

    /// Produce a copy of `config` with references rewritten for `target_org_id`
    ///
    /// `config` is left untouched. The output section is excluded from
    /// extraction and substitution. The entity's own id is never looked up.
    /// References with no mapping stay as they are and produce a warning.
    ///
    /// # Errors
    /// `ReferenceResolutionFailed` when the mapping store cannot be read.
    pub async fn resolve(
        &self,
        config: &ExportedConfig,
        path: &ResourcePath,
        source_entity_id: &str,
        target_org_id: &str,
        extractor: &dyn ReferenceExtractor,
    ) -> Result<Resolution, MigrationError> {
        let mut working = config.clone();
        let output = working.take_output();

        let candidates = extractor.extract(&working, path);
        tracing::debug!(
            strategy = extractor.name(),
            candidates = candidates.len(),
            target_org = target_org_id,
            "extracted reference candidates"
        );

        let mut rewritten = BTreeMap::new();
        let mut warnings = Vec::new();
        for reference in candidates {
            if reference == source_entity_id {
                continue;
            }
            let mapped = self
                .store
                .get_target_id(&reference, target_org_id)
                .await
                .map_err(|source| MigrationError::ReferenceResolutionFailed {
                    reference: reference.clone(),
                    target_org: target_org_id.to_string(),
                    source,
                })?;
            match mapped {
                Some(target_id) => {
                    tracing::debug!(from = %reference, to = %target_id, "rewriting reference");
                    rewritten.insert(reference, target_id);
                }
                None => {
                    tracing::warn!(
                        reference = %reference,
                        target_org = target_org_id,
                        "no mapping for reference, leaving it unchanged"
                    );
                    warnings.push(
                        Diagnostic::warning(format!(
                            "reference {reference} has no mapping in org {target_org_id}; left unchanged"
                        ))
                        .with_target(target_org_id),
                    );
                }
            }
        }

        if !rewritten.is_empty() {
            working = substitute(&working, &rewritten)?;
        }
        working.restore_output(output);

        Ok(Resolution {
            config: working,
            rewritten,
            warnings,
        })
    }
}

/// Replace every occurrence of each key with its value in one pass
fn substitute(
    config: &ExportedConfig,
    replacements: &BTreeMap<String, String>,
) -> Result<ExportedConfig, MigrationError> {
    let encoded: BTreeMap<String, String> = replacements
        .iter()
        .map(|(from, to)| (json_fragment(from), json_fragment(to)))
        .collect();

    // Longest first so an id never shadows a longer one sharing its prefix
    let mut needles: Vec<&str> = encoded.keys().map(String::as_str).collect();
    needles.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let pattern = needles
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    let matcher = Regex::new(&pattern).map_err(|e| DocumentError::Rewrite(e.to_string()))?;

    let text = config.to_json_string()?;
    let replaced = matcher.replace_all(&text, |caps: &regex::Captures<'_>| {
        encoded
            .get(&caps[0])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    });
    Ok(ExportedConfig::from_json_str(&replaced)?)
}

/// How `s` appears inside a serialized JSON string
fn json_fragment(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossorg_store::{MemoryStore, MockMappingStore, StoreError};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    const SELF_ID: &str = "6da92528-0107-4816-963b-cee291c0596c";
    const SKILL: &str = "a1111111-1111-4111-8111-111111111111";
    const SKILL_T: &str = "b2222222-2222-4222-8222-222222222222";
    const WRAPUP: &str = "c3333333-3333-4333-8333-333333333333";

    fn path() -> ResourcePath {
        ResourcePath::new("routing_queue", "support")
    }

    fn config() -> ExportedConfig {
        ExportedConfig::from_value(json!({
            "resource": {
                "routing_queue": {
                    "support": {
                        "name": "Support",
                        "skill_ids": [SKILL],
                        "routing": { "default_skill": SKILL, "wrapup_code": WRAPUP },
                        "description": format!("uses {SKILL}")
                    }
                }
            },
            "output": {
                format!("migrated_{SELF_ID}"): { "value": "${routing_queue.support.id}" }
            }
        }))
        .unwrap()
    }

    async fn resolver_with_skill_mapping() -> ReferenceResolver {
        let store = MemoryStore::new();
        store.upsert("routing_skill", SKILL, "orgA", SKILL_T).await.unwrap();
        ReferenceResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn rewrites_every_occurrence() {
        let resolver = resolver_with_skill_mapping().await;
        let input = config();

        let resolution = resolver
            .resolve(&input, &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap();

        let attrs = resolution.config.resource_attributes(&path()).unwrap();
        assert_eq!(attrs["skill_ids"], json!([SKILL_T]));
        assert_eq!(attrs["routing"]["default_skill"], SKILL_T);
        assert_eq!(attrs["description"], format!("uses {SKILL_T}"));
        assert_eq!(attrs["routing"]["wrapup_code"], WRAPUP);
        assert_eq!(resolution.rewritten.len(), 1);

        // input untouched
        assert_eq!(input, config());
    }

    #[tokio::test]
    async fn missing_mapping_is_a_warning() {
        let resolver = resolver_with_skill_mapping().await;

        let resolution = resolver
            .resolve(&config(), &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap();

        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].summary.contains(WRAPUP));
        assert!(!resolution.warnings[0].is_error());
    }

    #[tokio::test]
    async fn resolving_twice_changes_nothing() {
        let resolver = resolver_with_skill_mapping().await;

        let once = resolver
            .resolve(&config(), &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap();
        let twice = resolver
            .resolve(&once.config, &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap();

        assert_eq!(once.config, twice.config);
    }

    #[tokio::test]
    async fn self_reference_is_never_looked_up() {
        let mut store = MockMappingStore::new();
        store.expect_get_target_id().times(0);
        let resolver = ReferenceResolver::new(Arc::new(store));

        let input = ExportedConfig::from_value(json!({
            "resource": { "routing_queue": { "support": { "name": "Support" } } },
            "output": { format!("migrated_{SELF_ID}"): { "value": SELF_ID } }
        }))
        .unwrap();

        let resolution = resolver
            .resolve(&input, &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap();
        assert_eq!(resolution.config, input);
    }

    #[tokio::test]
    async fn self_id_in_attributes_is_left_alone() {
        let mut store = MockMappingStore::new();
        store
            .expect_get_target_id()
            .returning(|src, _| {
                assert_ne!(src, SELF_ID, "own id must not be looked up");
                Ok(None)
            });
        let resolver = ReferenceResolver::new(Arc::new(store));

        let input = ExportedConfig::from_value(json!({
            "resource": { "routing_queue": { "support": { "parent": SELF_ID, "skill": SKILL } } }
        }))
        .unwrap();

        let resolution = resolver
            .resolve(&input, &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap();
        assert_eq!(resolution.config, input);
    }

    #[tokio::test]
    async fn store_read_error_escalates() {
        let mut store = MockMappingStore::new();
        store
            .expect_get_target_id()
            .returning(|_, _| Err(StoreError::Unavailable("table offline".into())));
        let resolver = ReferenceResolver::new(Arc::new(store));

        let err = resolver
            .resolve(&config(), &path(), SELF_ID, "orgA", &PatternScan)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::ReferenceResolutionFailed { .. }));
    }

    #[test]
    fn declared_paths_walk_maps_and_lists() {
        let input = ExportedConfig::from_value(json!({
            "resource": { "routing_queue": { "support": {
                "members": [ { "user_id": "u-1" }, { "user_id": "u-2" } ],
                "skill_ids": ["s-1", "s-2"],
                "wrapup": { "code": "w-1" },
                "free_text": SKILL
            } } }
        }))
        .unwrap();
        let extractor = DeclaredPaths::new(vec![
            "members.user_id".into(),
            "skill_ids".into(),
            "wrapup.code".into(),
            "absent.path".into(),
        ]);

        let found = extractor.extract(&input, &path());
        assert_eq!(found, vec!["u-1", "u-2", "s-1", "s-2", "w-1"]);
    }

    #[test]
    fn auto_strategy_prefers_declared_metadata() {
        let bare = ResourceSchema::new("routing_queue");
        let declared = ResourceSchema::new("routing_queue").with_ref_attrs(["skill_ids"]);

        assert_eq!(ResolverStrategy::Auto.extractor_for(&bare).name(), "scan");
        assert_eq!(ResolverStrategy::Auto.extractor_for(&declared).name(), "declared");
        assert_eq!(ResolverStrategy::Scan.extractor_for(&declared).name(), "scan");
    }

    #[test]
    fn scan_dedupes_in_first_seen_order() {
        let found = PatternScan.extract(&config(), &path());
        assert_eq!(found, vec![SKILL.to_string(), WRAPUP.to_string()]);
    }

    #[test]
    fn recognises_entity_ids() {
        assert!(is_entity_id(SKILL));
        assert!(is_entity_id(&SKILL.to_uppercase()));
        assert!(!is_entity_id(&format!("x{SKILL}")));
        assert!(!is_entity_id("not-an-id"));
    }

    #[test]
    fn substitution_escapes_replacement() {
        let input = ExportedConfig::from_value(json!({ "a": SKILL })).unwrap();
        let mut map = BTreeMap::new();
        map.insert(SKILL.to_string(), "quote\"d".to_string());

        let out = substitute(&input, &map).unwrap();
        assert_eq!(out.sections()["a"], "quote\"d");
    }

    proptest! {
        #[test]
        fn substitution_is_single_pass(a in any::<u128>(), b in any::<u128>()) {
            let from = uuid::Uuid::from_u128(a).to_string();
            let to = uuid::Uuid::from_u128(b).to_string();
            prop_assume!(from != to);

            let input = ExportedConfig::from_value(json!({ "x": [from.clone(), { "y": from.clone() }] })).unwrap();
            let mut map = BTreeMap::new();
            map.insert(from.clone(), to.clone());

            let out = substitute(&input, &map).unwrap();
            prop_assert_eq!(out.sections()["x"].clone(), json!([to.clone(), { "y": to }]));
        }
    }
}

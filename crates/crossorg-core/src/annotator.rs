//! Output-capture annotation
//!
//! Adds an output declaration whose value is the migrated resource's id, so
//! the id assigned in the target org can be read back after apply.

use crate::document::{ExportedConfig, ResourcePath};
use serde_json::json;

/// Prefix keeping output keys from starting with a digit
pub const OUTPUT_KEY_PREFIX: &str = "migrated_";

/// Replace every character outside `[A-Za-z0-9-]` with `-`
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Deterministic output key for a source entity id
#[must_use]
pub fn build_output_key(source_entity_id: &str) -> String {
    format!("{OUTPUT_KEY_PREFIX}{}", sanitize(source_entity_id))
}

/// Return a copy of `config` declaring an output for `path`'s id
///
/// Existing outputs are kept; a declaration already stored under the same
/// key is replaced.
#[must_use]
pub fn annotate(config: &ExportedConfig, path: &ResourcePath, source_entity_id: &str) -> ExportedConfig {
    let key = build_output_key(source_entity_id);
    let mut annotated = config.clone();
    let previous = annotated.insert_output(key.clone(), json!({ "value": path.id_expression() }));
    if previous.is_some() {
        tracing::warn!(key = %key, "replacing existing output declaration");
    }
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn key_is_prefixed_and_stable() {
        let id = "6da92528-0107-4816-963b-cee291c0596c";
        assert_eq!(
            build_output_key(id),
            "migrated_6da92528-0107-4816-963b-cee291c0596c"
        );
        assert_eq!(build_output_key(id), build_output_key(id));
    }

    #[test]
    fn every_disallowed_char_becomes_hyphen() {
        assert_eq!(sanitize("a_b c.d"), "a-b-c-d");
        assert_eq!(sanitize("x__y"), "x--y");
        assert_eq!(sanitize("é"), "-");
    }

    #[test]
    fn annotate_adds_output_without_touching_input() {
        let config = ExportedConfig::from_value(json!({
            "resource": { "routing_queue": { "support": { "name": "Support" } } },
            "output": { "other": { "value": "keep" } }
        }))
        .unwrap();
        let path = ResourcePath::new("routing_queue", "support");

        let annotated = annotate(&config, &path, "S-1");

        assert!(config.output().unwrap().get("migrated_S-1").is_none());
        let output = annotated.output().unwrap();
        assert_eq!(output["migrated_S-1"]["value"], "${routing_queue.support.id}");
        assert_eq!(output["other"]["value"], "keep");
    }

    proptest! {
        #[test]
        fn distinct_uuids_never_collide(a in any::<u128>(), b in any::<u128>()) {
            prop_assume!(a != b);
            let ka = build_output_key(&uuid::Uuid::from_u128(a).to_string());
            let kb = build_output_key(&uuid::Uuid::from_u128(b).to_string());
            prop_assert_ne!(ka, kb);
        }

        #[test]
        fn keys_only_use_allowed_chars(raw in ".{0,40}") {
            let key = build_output_key(&raw);
            prop_assert!(key.starts_with(OUTPUT_KEY_PREFIX));
            prop_assert!(key[OUTPUT_KEY_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'));
            prop_assert_eq!(key.clone(), build_output_key(&raw));
        }
    }
}

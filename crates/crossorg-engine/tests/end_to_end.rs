#![cfg(unix)]

use crossorg_core::prelude::*;
use crossorg_core::ResourceSchema;
use crossorg_engine::{build_collaborators, Settings};
use crossorg_store::{JsonFileStore, MappingStore};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const SOURCE: &str = "6da92528-0107-4816-963b-cee291c0596c";
const SKILL: &str = "a1111111-1111-4111-8111-111111111111";

/// Stand-in for `tofu`: succeeds, and reports `target-<org>` as the id
const FAKE_TOFU: &str = r#"#!/bin/sh
case "$1" in
  output)
    org=$(basename "$(dirname "$PWD")")
    for f in *.tf.json; do
      id=${f%.tf.json}
      printf '{"migrated_%s":{"value":"target-%s"}}' "$id" "$org"
    done
    ;;
  *)
    echo "$*" >> calls.log
    ;;
esac
"#;

fn settings_in(dir: &Path) -> Settings {
    let bin = dir.join("fake-tofu");
    std::fs::write(&bin, FAKE_TOFU).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

    let snapshot = dir.join("exports/routing_queue");
    std::fs::create_dir_all(&snapshot).unwrap();
    std::fs::write(
        snapshot.join(format!("{SOURCE}.tf.json")),
        serde_json::to_vec(&serde_json::json!({
            "resource": { "routing_queue": { "support": { "name": "Support", "skill_ids": [SKILL] } } }
        }))
        .unwrap(),
    )
    .unwrap();

    let mut settings = Settings::default();
    settings.engine.binary = bin;
    settings.resource_types = vec![ResourceSchema::new("routing_queue")];
    settings.resolve_paths(dir);
    settings
}

fn org(id: &str) -> TargetOrg {
    TargetOrg::new(id, id, crossorg_core::Credentials::new("c", "s", "r"))
}

#[tokio::test]
async fn migrates_and_deletes_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path());
    JsonFileStore::new(&settings.store_path)
        .upsert("routing_skill", SKILL, "orgA", "skill-in-A")
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(build_collaborators(&settings), settings.orchestrator_options());
    let report = orchestrator
        .migrate(
            &MigrationRequest::create_or_update("routing_queue", SOURCE),
            &[org("orgA"), org("orgB")],
        )
        .await;
    assert!(report.succeeded(), "{:?}", report.diagnostics);

    let store = JsonFileStore::new(&settings.store_path);
    let record = store.get(SOURCE).await.unwrap().unwrap();
    assert_eq!(record.target_id("orgA"), Some("target-orgA"));
    assert_eq!(record.target_id("orgB"), Some("target-orgB"));

    let org_a_dir = dir.path().join("state/organizations/orgA/config");
    let written = std::fs::read_to_string(org_a_dir.join(format!("{SOURCE}.tf.json"))).unwrap();
    assert!(written.contains("skill-in-A"));
    let calls = std::fs::read_to_string(org_a_dir.join("calls.log")).unwrap();
    assert!(calls.contains("-target=routing_queue.support"));

    let report = orchestrator
        .migrate(&MigrationRequest::delete("routing_queue", SOURCE), &[org("orgA")])
        .await;
    assert!(report.succeeded(), "{:?}", report.diagnostics);
    assert!(!org_a_dir.join(format!("{SOURCE}.tf.json")).exists());
    assert!(store.get(SOURCE).await.unwrap().is_none());
}

//! Crossorg Engine - concrete collaborators
//!
//! - [`TofuEngine`]: OpenTofu CLI as the apply engine
//! - [`FileConfigStorage`]: per-org configuration directories
//! - [`SnapshotExportSystem`]: exports read from a snapshot directory
//! - [`Settings`] and [`OrgRoster`]: `crossorg.toml` and `orgs.yml`

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod roster;
pub mod settings;
pub mod snapshot;
pub mod storage;
pub mod tofu;

pub use roster::{OrgRoster, DEFAULT_ROSTER_FILE};
pub use settings::{Settings, SettingsError, DEFAULT_SETTINGS_FILE};
pub use snapshot::SnapshotExportSystem;
pub use storage::FileConfigStorage;
pub use tofu::TofuEngine;

use crossorg_core::Collaborators;
use crossorg_store::JsonFileStore;
use std::sync::Arc;

/// Wire the file-backed collaborators described by `settings`
#[must_use]
pub fn build_collaborators(settings: &Settings) -> Collaborators {
    let engine = TofuEngine::new(&settings.engine.binary)
        .with_timeout(settings.engine.timeout())
        .with_init_args(settings.engine.extra_init_args.clone());

    Collaborators {
        exporter: Arc::new(SnapshotExportSystem::new(
            &settings.snapshot_dir,
            settings.resource_types.iter().cloned(),
        )),
        engine: Arc::new(engine),
        storage: Arc::new(FileConfigStorage::new(&settings.config_root)),
        store: Arc::new(JsonFileStore::new(&settings.store_path)),
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

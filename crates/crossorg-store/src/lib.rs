//! Crossorg identity mapping store
//!
//! Durable mapping from a source entity id to its counterpart id in every
//! target organization the entity has been migrated to.
//!
//! # Core Concepts
//!
//! - [`IdentityRecord`]: one migrated entity and its per-target ids
//! - [`MappingStore`]: async contract used by the orchestrator and resolver
//! - [`JsonFileStore`]: single JSON document, versioned, atomically rewritten
//! - [`MemoryStore`]: in-process store for tests and dry runs
//!
//! # Example
//!
//! ```rust,ignore
//! use crossorg_store::{JsonFileStore, MappingStore};
//!
//! # async fn example() -> Result<(), crossorg_store::StoreError> {
//! let store = JsonFileStore::new("state/identity-map.json");
//! store.upsert("routing_queue", "6da92528-...", "org-a", "1f0e...").await?;
//! assert!(store.get_target_id("6da92528-...", "org-a").await?.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod document;
mod error;
mod file;
mod memory;
mod record;
mod store;

pub use error::StoreError;
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use record::IdentityRecord;
pub use store::MappingStore;

#[cfg(feature = "mock")]
pub use store::MockMappingStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

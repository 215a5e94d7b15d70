//! Crossorg Core - cross-org migration engine
//!
//! Migrates one entity from a source organization to an ordered list of
//! target organizations:
//! - Exports the entity and locates its resource address
//! - Declares an output that captures the id assigned in each target
//! - Rewrites references to already-migrated entities per target
//! - Applies under the target's credentials and records the new id
//!
//! # Example
//!
//! ```rust,ignore
//! use crossorg_core::prelude::*;
//!
//! # async fn example(collaborators: Collaborators, targets: Vec<TargetOrg>) {
//! let orchestrator = Orchestrator::new(collaborators, OrchestratorOptions::default());
//! let request = MigrationRequest::create_or_update("routing_queue", "6da92528-...");
//!
//! let report = orchestrator.migrate(&request, &targets).await;
//! for diagnostic in &report.diagnostics {
//!     println!("{:?}: {}", diagnostic.severity, diagnostic.summary);
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod annotator;
pub mod collaborators;
pub mod credentials;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod types;

pub use annotator::{annotate, build_output_key, sanitize, OUTPUT_KEY_PREFIX};
pub use collaborators::{
    ApplyEngine, ApplyMode, ApplyRequest, ConfigStorage, DeleteOutcome, EngineError, ExportError, ExportSystem,
    OutputValues, ResourceSchema, StorageError,
};
pub use credentials::{
    CredentialContext, CredentialEnvVars, CredentialError, CredentialGuard, CredentialMode, CredentialSwitcher,
    Credentials, Scoped, TargetOrg,
};
pub use document::{DocumentError, ExportedConfig, ResourcePath};
pub use error::{Diagnostic, Diagnostics, MigrationError, Severity};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorOptions};
pub use resolver::{
    DeclaredPaths, PatternScan, ReferenceExtractor, ReferenceResolver, Resolution, ResolverStrategy,
};
pub use types::{
    DeletePolicy, MigrationReport, MigrationRequest, MigrationState, Operation, TargetOutcome, TargetResult,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running migrations
    pub use crate::{
        Collaborators, CredentialMode, DeletePolicy, Diagnostic, MigrationReport, MigrationRequest,
        MigrationState, Orchestrator, OrchestratorOptions, ResolverStrategy, Severity, TargetOrg,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

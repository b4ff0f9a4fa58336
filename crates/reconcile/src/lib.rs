//! # Reconcile
//!
//! Brings a running instance into conformance with a software template
//! without recreating it.
//!
//! This crate provides:
//! - An [`InstanceInspector`] that snapshots packages, services, users, ports
//!   and applied-template history through a [`remote::RemoteExecutor`]
//! - A pure [`calculate_diff`] between that snapshot and a [`Template`]
//! - An [`ApplyEngine`] that executes a diff category by category, fail-fast
//! - A [`RollbackManager`] that checkpoints an instance and restores it
//! - A [`TemplateEngine`] composing all of the above into one pipeline
//!
//! ## Example
//!
//! ```no_run
//! use reconcile::{ApplyRequest, MemoryCheckpointStore, PackageManagerKind, Template, TemplateEngine};
//! use remote::{Context, ScriptedExecutor};
//! use std::sync::Arc;
//!
//! let engine = TemplateEngine::new(
//!     Arc::new(ScriptedExecutor::new()),
//!     Arc::new(MemoryCheckpointStore::new()),
//! );
//! let template = Template::new("datasci")
//!     .with_packages(PackageManagerKind::Pip, ["numpy"])
//!     .with_service("jupyter", Some(8888));
//!
//! let response = engine.apply_template(
//!     &Context::background(),
//!     ApplyRequest::new("ws1", template).dry_run(),
//! )?;
//! println!("{}", response.message);
//! # Ok::<(), reconcile::EngineError>(())
//! ```

pub mod apply;
pub mod checkpoint;
pub mod diff;
pub mod engine;
pub mod error;
pub mod history;
pub mod inspector;
pub mod managers;
pub mod rollback;
pub mod store;
pub mod template;
pub mod types;
pub mod version;

pub use apply::{
    ApplyCategory, ApplyEngine, ApplyFailure, ApplyResult, CategoryReport, CategoryStatus,
    FailFast,
};
pub use checkpoint::{BackedUpFile, Checkpoint, CheckpointSummary};
pub use diff::{
    ConflictDiff, ConflictKind, PackageAction, PackageDiff, ServiceAction, ServiceDiff,
    TemplateDiff, UserAction, UserDiff, calculate_diff,
};
pub use engine::{ApplyRequest, ApplyResponse, TemplateEngine};
pub use error::{
    ApplyError, CheckpointError, DiffError, EngineError, ErrorCategory, Result, RollbackError,
    StoreError,
};
pub use inspector::{InstanceInspector, PROBE_COMMANDS};
pub use managers::PackageManager;
pub use rollback::{BestEffort, FailedStep, RollbackManager, RollbackReport};
pub use store::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
pub use template::{
    DesiredServiceState, PackageSpec, ServiceSpec, Template, UserSpec, VersionConstraint,
};
pub use types::{
    AppliedTemplate, ExistingUser, InstalledPackage, InstanceState, PackageManagerKind,
    RecordedPackage, RunningService, ServiceStatus,
};

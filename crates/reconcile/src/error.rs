//! Error types for template reconciliation.
//!
//! A partially applied template is not an error: it comes back as an
//! [`ApplyResponse`](crate::ApplyResponse) with `success == false`. The
//! enums here cover failures that stop a pipeline before it can report.

use crate::apply::ApplyCategory;
use crate::diff::ConflictDiff;
use crate::rollback::FailedStep;
use std::io;
use thiserror::Error;

/// A template could not be diffed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// A package spec is empty or malformed
    #[error("invalid package spec '{spec}': {reason}")]
    InvalidPackageSpec { spec: String, reason: String },

    /// Packages were declared under a manager the engine cannot drive
    #[error("packages declared under an unsupported package manager: {}", .packages.join(", "))]
    UnsupportedManager { packages: Vec<String> },
}

/// The transport failed while a category was being applied.
///
/// The instance may be partially changed; no result can be trusted.
#[derive(Debug, Error)]
#[error("transport failure during {category}: {source}")]
pub struct ApplyError {
    pub category: ApplyCategory,
    #[source]
    pub source: remote::Error,
}

/// Checkpoint persistence failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A checkpoint with this id already exists
    #[error("checkpoint already exists: {0}")]
    Duplicate(String),

    /// A stored checkpoint could not be decoded
    #[error("stored checkpoint {id} is unreadable: {message}")]
    Corrupt { id: String, message: String },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A checkpoint could not be created.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The instance could not be reached while snapshotting
    #[error("snapshot transport failure: {0}")]
    Transport(#[from] remote::Error),

    /// The checkpoint could not be stored
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local scratch space failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A rollback could not be completed.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// No checkpoint with this id
    #[error("checkpoint not found: {id}")]
    NotFound { id: String },

    /// The checkpoint belongs to another instance
    #[error("checkpoint {id} belongs to '{owner}', not '{instance}'")]
    WrongInstance {
        id: String,
        instance: String,
        owner: String,
    },

    /// The instance became unreachable mid-rollback
    #[error("rollback to {id} aborted: {source}")]
    Transport {
        id: String,
        #[source]
        source: remote::Error,
    },

    /// Some restore steps failed; the checkpoint is kept
    #[error("rollback to {id} incomplete: {}", describe_steps(.failed))]
    Incomplete { id: String, failed: Vec<FailedStep> },

    /// Checkpoint store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local scratch space failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn describe_steps(steps: &[FailedStep]) -> String {
    steps
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Categories of engine errors.
///
/// Used by the CLI to pick an exit code and show a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request was malformed
    Validation,
    /// The instance could not be reached
    Transport,
    /// The diff has conflicts and the caller did not force
    Conflict,
    /// The template itself is invalid
    Template,
    /// Snapshotting or checkpoint storage failed
    Checkpoint,
    /// A rollback failed or was incomplete
    Rollback,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid request",
            Self::Transport => "Instance unreachable",
            Self::Conflict => "Template conflicts with instance",
            Self::Template => "Invalid template",
            Self::Checkpoint => "Checkpoint failed",
            Self::Rollback => "Rollback failed",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Check the instance name and template file",
            Self::Transport => "Check that the instance is running and reachable, then retry",
            Self::Conflict => "Resolve the listed conflicts, or re-run with --force",
            Self::Template => "Fix the package specs in the template",
            Self::Checkpoint => "Check the checkpoint store path and instance permissions",
            Self::Rollback => "Inspect the instance; the checkpoint is kept for another attempt",
        }
    }

    /// Process exit code the CLI uses for this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Conflict => 2,
            _ => 1,
        }
    }
}

/// Errors returned by [`TemplateEngine`](crate::TemplateEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request rejected before any I/O
    #[error("invalid request: {0}")]
    Validation(String),

    /// Inspection could not reach the instance
    #[error("failed to inspect '{instance}': {source}")]
    InspectionTransport {
        instance: String,
        #[source]
        source: remote::Error,
    },

    /// The template could not be diffed
    #[error("template '{template}' is invalid: {source}")]
    Diff {
        template: String,
        #[source]
        source: DiffError,
    },

    /// Conflicts found and not forced
    #[error(
        "template '{template}' conflicts with instance '{instance}':\n{}",
        describe_conflicts(.conflicts)
    )]
    Conflict {
        instance: String,
        template: String,
        conflicts: Vec<ConflictDiff>,
    },

    /// Checkpoint creation or storage failed
    #[error("checkpoint for '{instance}' failed: {source}")]
    Checkpoint {
        instance: String,
        #[source]
        source: CheckpointError,
    },

    /// Transport failed mid-apply; the instance may be partially changed
    #[error("apply to '{instance}' interrupted during {category}: {source} (checkpoint {checkpoint_id})")]
    ApplyTransport {
        instance: String,
        category: ApplyCategory,
        checkpoint_id: String,
        #[source]
        source: remote::Error,
    },

    /// Rollback failed
    #[error(transparent)]
    Rollback(#[from] RollbackError),
}

fn describe_conflicts(conflicts: &[ConflictDiff]) -> String {
    conflicts
        .iter()
        .map(|c| format!("  - {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

impl EngineError {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Validation(_) => ErrorCategory::Validation,
            EngineError::InspectionTransport { .. } | EngineError::ApplyTransport { .. } => {
                ErrorCategory::Transport
            }
            EngineError::Diff { .. } => ErrorCategory::Template,
            EngineError::Conflict { .. } => ErrorCategory::Conflict,
            EngineError::Checkpoint { .. } => ErrorCategory::Checkpoint,
            EngineError::Rollback(_) => ErrorCategory::Rollback,
        }
    }

    /// Checkpoint id to roll back to, when the failure left one behind.
    pub fn checkpoint_id(&self) -> Option<&str> {
        match self {
            EngineError::ApplyTransport { checkpoint_id, .. } => Some(checkpoint_id),
            EngineError::Rollback(RollbackError::Incomplete { id, .. }) => Some(id),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

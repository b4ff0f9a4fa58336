//! Error types for remote execution.
//!
//! A command that runs and exits non-zero is *not* an error: callers get an
//! [`ExecutionResult`](crate::ExecutionResult) and inspect the exit code.
//! The variants here describe failures of the transport itself, so callers
//! can tell "the instance said no" apart from "we never reached it".

use std::io;
use thiserror::Error;

/// Categories of remote errors.
///
/// Used by callers to decide between retrying, aborting, and reporting a
/// configuration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The instance (or broker) could not be reached
    Unreachable,
    /// The caller-supplied deadline passed
    Timeout,
    /// The caller cancelled the operation
    Cancelled,
    /// A remote file did not exist
    NotFound,
    /// Instance unknown or executor misconfigured
    Configuration,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this category means the transport is unusable for the call.
    ///
    /// Timeouts and cancellations count: the pipeline is aborted exactly as
    /// for an unreachable instance.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Unreachable | Self::Timeout | Self::Cancelled | Self::Configuration
        )
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unreachable => "Instance unreachable",
            Self::Timeout => "Operation timed out",
            Self::Cancelled => "Operation cancelled",
            Self::NotFound => "Remote file not found",
            Self::Configuration => "Executor misconfigured",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Unreachable => "Check that the instance is running and its address is current",
            Self::Timeout => "Retry with a longer --timeout",
            Self::Cancelled => "Re-run the command when ready",
            Self::NotFound => "Verify the remote path",
            Self::Configuration => "Check the instance inventory in tessera.toml",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to a remote instance.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport could not reach the instance
    #[error("instance '{instance}' is unreachable: {message}")]
    Unreachable {
        /// Instance name the call targeted
        instance: String,
        /// Transport diagnostic (ssh stderr, HTTP error, ...)
        message: String,
    },

    /// The context deadline expired before the call completed
    #[error("remote call timed out")]
    Timeout,

    /// The context was cancelled
    #[error("remote call cancelled")]
    Cancelled,

    /// A remote file requested by `get_file` does not exist
    #[error("remote file not found on '{instance}': {path}")]
    NotFound {
        /// Instance name
        instance: String,
        /// Remote path that was requested
        path: String,
    },

    /// A file transfer failed for a reason other than reachability
    #[error("file transfer to/from '{instance}' failed for {path}: {message}")]
    TransferFailed {
        /// Instance name
        instance: String,
        /// Remote path involved
        path: String,
        /// Transport diagnostic
        message: String,
    },

    /// No endpoint is known for the instance
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// The command broker answered with an unexpected status or payload
    #[error("broker error: {message}")]
    Broker {
        /// Description of the failure
        message: String,
        /// HTTP status code, when the broker answered at all
        status: Option<u16>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } | Error::Broker { .. } => ErrorCategory::Unreachable,
            Error::Timeout => ErrorCategory::Timeout,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::UnknownInstance(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error means the call never produced a usable result.
    pub fn is_transport(&self) -> bool {
        self.category().is_transport()
    }

    /// Build an [`Error::Unreachable`] for an instance.
    pub fn unreachable(instance: &str, message: impl Into<String>) -> Self {
        Error::Unreachable {
            instance: instance.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Deployment error types

use gantry_lifecycle::LifecycleError;
use gantry_types::{ModuleId, ResolutionFailure};
use thiserror::Error;

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeployError {
    /// The change set does not resolve; nothing was committed.
    #[error("resolution incomplete: {} module(s) failed", .0.len())]
    ResolutionIncomplete(Vec<ResolutionFailure>),

    /// A module failed to install; the commit was rolled back.
    #[error("commit failed at {module}: {cause}")]
    CommitFailed { module: ModuleId, cause: String },

    /// Rollback itself failed; the live graph may hold partial state.
    #[error("rollback left {module} behind: {cause}")]
    RollbackInconsistent { module: ModuleId, cause: String },

    /// The live graph changed since this change set was opened.
    #[error("live graph changed since the change set was opened")]
    StaleSnapshot,

    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("module not found: {0}")]
    ModuleNotFound(ModuleId),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Snapshot(#[from] gantry_resolver::SnapshotError),
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

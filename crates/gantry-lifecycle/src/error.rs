//! Lifecycle error types

use crate::arena::ArtifactHandle;
use gantry_types::ArtifactState;
use thiserror::Error;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("artifact not found: {0}")]
    ArtifactNotFound(ArtifactHandle),

    #[error("artifact {artifact}: illegal transition {from} -> {to}")]
    InvalidTransition {
        artifact: ArtifactHandle,
        from: ArtifactState,
        to: ArtifactState,
    },

    #[error("adding {child} under {parent} would create a cycle")]
    CycleDetected {
        parent: ArtifactHandle,
        child: ArtifactHandle,
    },

    #[error("artifact {0} has no start in flight")]
    NotStarting(ArtifactHandle),

    #[error("executor failure: {0}")]
    Executor(String),
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

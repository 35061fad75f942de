//! Snapshot error types

use gantry_types::ModuleId;
use thiserror::Error;

/// Errors from snapshot mutation. Resolution failures are not errors; they
/// are returned as data from `resolve`/`diagnose`.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("module already present in snapshot: {0}")]
    DuplicateModule(ModuleId),
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

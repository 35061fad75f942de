//! Gantry Resolver - Speculative resolution over throwaway snapshots
//!
//! A [`QuasiFramework`] is a disposable overlay of the live module graph:
//! a base set of already-committed modules plus a delta of speculatively
//! installed ones, with its own independent wire set. Candidate modules are
//! installed and resolved here without affecting the live system, so an
//! entire batch of changes can be validated before being committed
//! atomically, or diagnosed precisely on failure.
//!
//! ## Architectural Boundaries
//!
//! - `gantry-resolver` owns: snapshots, candidate ordering, binding,
//!   uses-consistency, failure diagnosis
//! - `gantry-deploy` owns: seeding snapshots from the live graph and
//!   committing resolved snapshots into it
//!
//! ## Key Principle
//!
//! Resolution-time problems are data, not errors: `resolve` and `diagnose`
//! return [`ResolutionFailure`] lists and never mutate anything outside the
//! snapshot they were handed.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod resolver;
pub mod snapshot;

// Re-exports
pub use error::{Result, SnapshotError};
pub use resolver::Resolution;
pub use snapshot::QuasiFramework;

pub use gantry_types::ResolutionFailure;

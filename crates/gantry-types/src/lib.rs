//! Gantry Types - Core types for the module deployment kernel
//!
//! Gantry is the deployment kernel of a modular application runtime. It
//! installs, resolves, starts, stops, and uninstalls versioned modules that
//! declare capabilities and requirements.
//!
//! ## Architectural Boundaries
//!
//! - **gantry-types** owns: the immutable module graph model, version
//!   ranges, artifact lifecycle states, deployment events
//! - **gantry-resolver** owns: speculative snapshots and the resolution
//!   simulator
//! - **gantry-lifecycle** owns: the install-artifact arena and listener
//!   fan-out
//! - **gantry-deploy** owns: the live graph, commit/rollback, management
//!   queries
//!
//! ## Key Concepts
//!
//! - **Module**: a versioned, independently deployable unit of
//!   capabilities and requirements
//! - **Capability**: a named, versioned, attributed thing a module provides
//! - **Requirement**: a constraint a module declares on some capability
//! - **Wire**: a resolved binding from one requirement to one capability
//! - **ArtifactState**: lifecycle position of a deployable unit
//! - **Events**: unified observability stream for deployment operations

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifact;
pub mod events;
pub mod failure;
pub mod module;
pub mod version;

// Re-export main types
pub use artifact::{ArtifactIdentity, ArtifactState};
pub use events::{DeployEvent, DeployEventEnvelope, DeployEventKind, EventSource};
pub use failure::{RejectedCandidate, RejectionReason, ResolutionFailure};
pub use module::{
    Capability, Module, ModuleDescriptor, ModuleId, Namespace, Region, Requirement, Wire,
    DYNAMIC_NAME,
};
pub use version::{RangeParseError, VersionRange};

//! Gantry Deploy - Speculative resolution and atomic commit
//!
//! The coordinator owns the live module graph and is the only writer to
//! it. Changes are speculated against disposable snapshots and applied by
//! an all-or-nothing commit: the delta installs through the module runtime
//! provider-first, and any install failure triggers a reverse-order
//! rollback before the error surfaces. Application-level deploys bundle a
//! commit with a composite plan artifact in the lifecycle arena.
//!
//! ## Architectural Boundaries
//!
//! - `gantry-deploy` owns: the live graph, the commit protocol, the
//!   application registry, the runtime seam
//! - `gantry-resolver` owns: snapshots and the binding algorithm
//! - `gantry-lifecycle` owns: artifact states, plans, listener delivery
//!
//! ## Key Principle
//!
//! The live graph moves between consistent resolutions only. Readers never
//! observe a half-applied change; a failed commit leaves the graph
//! bit-for-bit as it was.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod coordinator;
pub mod error;
pub mod live;
pub mod runtime;

// Re-exports
pub use coordinator::{ChangeSet, DeployCoordinator};
pub use error::{DeployError, Result};
pub use live::LiveGraph;
pub use runtime::{InMemoryModuleRuntime, ModuleHandle, ModuleRuntime};

pub use gantry_lifecycle::{PlanMode, PlanStartReport};
pub use gantry_resolver::QuasiFramework;

//! Gantry Lifecycle - Install-artifact state machine and listener fan-out
//!
//! Deployable units (single modules or composite plans forming a DAG — a
//! module may be shared by several plans) live in an arena of nodes
//! addressed by opaque handles. Each node carries a lifecycle state; every
//! transition is validated against the state machine in `gantry-types` and
//! fanned out synchronously to registered listeners.
//!
//! ## Architectural Boundaries
//!
//! - `gantry-lifecycle` owns: the artifact arena, state transitions, the
//!   tri-state start signal, listener delivery
//! - `gantry-deploy` owns: driving artifacts through install/resolve
//!   transitions during commit, and wiring the start executor to the
//!   module runtime
//!
//! ## Key Principle
//!
//! Lifecycle failures become recorded state plus a notified cause, not
//! errors thrown past the triggering call. A misbehaving listener never
//! fails the operation that emitted the event.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod arena;
pub mod error;
pub mod notifier;
pub mod plan;
pub mod signal;

// Re-exports
pub use arena::{ArtifactArena, ArtifactHandle, ChildEdge};
pub use error::{LifecycleError, Result};
pub use notifier::{DeploymentListener, ListenerHandle, Notifier};
pub use plan::{start_plan, stop_plan, PlanMode, PlanStartReport, StartExecutor};
pub use signal::{SignalWait, StartOutcome, StartSignal};

pub use gantry_types::{ArtifactIdentity, ArtifactState};

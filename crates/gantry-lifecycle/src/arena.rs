//! The install-artifact arena.
//!
//! Artifacts live in an arena of nodes addressed by opaque handles, with
//! explicit child/parent edge lists instead of parent pointers — the graph
//! is a DAG, not a tree, since one module may be shared by several plans.
//! Nodes survive refresh operations that replace children in place and are
//! removed only at successful uninstall.

use crate::error::{LifecycleError, Result};
use crate::notifier::Notifier;
use crate::signal::{StartOutcome, StartSignal};
use dashmap::DashMap;
use gantry_types::{
    ArtifactIdentity, ArtifactState, DeployEvent, DeployEventKind, EventSource,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Opaque handle addressing a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactHandle(u64);

impl std::fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "artifact-{}", self.0)
    }
}

/// Edge from a composite plan to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEdge {
    pub child: ArtifactHandle,
    /// Mandatory children gate the parent's own lifecycle; optional ones
    /// may fail without failing the plan.
    pub mandatory: bool,
}

#[derive(Debug, Default)]
struct Edges {
    children: Vec<ChildEdge>,
    parents: Vec<ArtifactHandle>,
}

/// A start operation in flight: the signal plus the held operation guard,
/// released when the start finishes.
struct InFlightStart {
    signal: StartSignal,
    _guard: OwnedMutexGuard<()>,
}

struct ArtifactNode {
    identity: ArtifactIdentity,
    location: String,
    properties: DashMap<String, String>,
    state: RwLock<ArtifactState>,
    edges: RwLock<Edges>,
    /// Install, start, stop, and uninstall are mutually exclusive per
    /// artifact; reads of state/properties are always safe.
    op_lock: Arc<AsyncMutex<()>>,
    in_flight: StdMutex<Option<InFlightStart>>,
}

/// Arena of install artifacts with validated lifecycle transitions.
pub struct ArtifactArena {
    nodes: DashMap<ArtifactHandle, Arc<ArtifactNode>>,
    next_handle: AtomicU64,
    notifier: Arc<Notifier>,
}

impl ArtifactArena {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            nodes: DashMap::new(),
            next_handle: AtomicU64::new(0),
            notifier,
        }
    }

    /// Create a node. Creation is the entry into the state machine: the
    /// node starts in [`ArtifactState::Installing`].
    pub fn create(&self, identity: ArtifactIdentity, location: impl Into<String>) -> ArtifactHandle {
        let handle = ArtifactHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let node = ArtifactNode {
            identity: identity.clone(),
            location: location.into(),
            properties: DashMap::new(),
            state: RwLock::new(ArtifactState::Installing),
            edges: RwLock::new(Edges::default()),
            op_lock: Arc::new(AsyncMutex::new(())),
            in_flight: StdMutex::new(None),
        };
        self.nodes.insert(handle, Arc::new(node));
        debug!(%handle, artifact = %identity, "artifact created");
        handle
    }

    fn node(&self, handle: ArtifactHandle) -> Result<Arc<ArtifactNode>> {
        self.nodes
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or(LifecycleError::ArtifactNotFound(handle))
    }

    pub fn contains(&self, handle: ArtifactHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn identity(&self, handle: ArtifactHandle) -> Result<ArtifactIdentity> {
        Ok(self.node(handle)?.identity.clone())
    }

    pub fn location(&self, handle: ArtifactHandle) -> Result<String> {
        Ok(self.node(handle)?.location.clone())
    }

    pub fn state(&self, handle: ArtifactHandle) -> Result<ArtifactState> {
        let node = self.node(handle)?;
        let state = read_lock(&node.state);
        Ok(*state)
    }

    pub fn get_property(&self, handle: ArtifactHandle, key: &str) -> Result<Option<String>> {
        Ok(self.node(handle)?.properties.get(key).map(|v| v.clone()))
    }

    pub fn set_property(
        &self,
        handle: ArtifactHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.node(handle)?.properties.insert(key.into(), value.into());
        Ok(())
    }

    /// Attach `child` under `parent`. Multi-parent is allowed; cycles are
    /// not.
    pub fn add_child(
        &self,
        parent: ArtifactHandle,
        child: ArtifactHandle,
        mandatory: bool,
    ) -> Result<()> {
        if parent == child || self.reachable(child, parent)? {
            return Err(LifecycleError::CycleDetected { parent, child });
        }
        let parent_node = self.node(parent)?;
        let child_node = self.node(child)?;

        write_lock(&parent_node.edges)
            .children
            .push(ChildEdge { child, mandatory });
        write_lock(&child_node.edges).parents.push(parent);
        Ok(())
    }

    /// Replace a child edge in place, preserving the parent node and the
    /// edge's mandatory flag. Used by refresh operations.
    pub fn replace_child(
        &self,
        parent: ArtifactHandle,
        old_child: ArtifactHandle,
        new_child: ArtifactHandle,
    ) -> Result<()> {
        if self.reachable(new_child, parent)? {
            return Err(LifecycleError::CycleDetected {
                parent,
                child: new_child,
            });
        }
        let parent_node = self.node(parent)?;
        {
            let mut edges = write_lock(&parent_node.edges);
            let edge = edges
                .children
                .iter_mut()
                .find(|e| e.child == old_child)
                .ok_or(LifecycleError::ArtifactNotFound(old_child))?;
            edge.child = new_child;
        }
        write_lock(&self.node(old_child)?.edges)
            .parents
            .retain(|p| *p != parent);
        write_lock(&self.node(new_child)?.edges).parents.push(parent);
        Ok(())
    }

    pub fn children(&self, handle: ArtifactHandle) -> Result<Vec<ChildEdge>> {
        Ok(read_lock(&self.node(handle)?.edges).children.clone())
    }

    pub fn parents(&self, handle: ArtifactHandle) -> Result<Vec<ArtifactHandle>> {
        Ok(read_lock(&self.node(handle)?.edges).parents.clone())
    }

    /// Whether `to` is reachable from `from` through child edges.
    fn reachable(&self, from: ArtifactHandle, to: ArtifactHandle) -> Result<bool> {
        let mut queue = vec![from];
        let mut seen = Vec::new();
        while let Some(current) = queue.pop() {
            if current == to {
                return Ok(true);
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Ok(node) = self.node(current) {
                queue.extend(read_lock(&node.edges).children.iter().map(|e| e.child));
            }
        }
        Ok(false)
    }

    /// Move an artifact to a new lifecycle state. Validates the move
    /// against the transition graph, then notifies listeners synchronously.
    /// Returns the previous state.
    pub fn transition(&self, handle: ArtifactHandle, to: ArtifactState) -> Result<ArtifactState> {
        let node = self.node(handle)?;
        let from = {
            let mut state = write_lock(&node.state);
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    artifact: handle,
                    from,
                    to,
                });
            }
            *state = to;
            from
        };

        info!(%handle, artifact = %node.identity, %from, %to, "artifact transition");
        self.notifier.emit(
            DeployEvent::new(
                DeployEventKind::StateChanged {
                    artifact: node.identity.to_string(),
                    from,
                    to,
                },
                node.identity.name.clone(),
                node.identity.version.clone(),
            ),
            EventSource::Lifecycle,
        );
        Ok(from)
    }

    /// Acquire the artifact's operation lock, serializing lifecycle
    /// operations against it.
    pub async fn lock_operation(&self, handle: ArtifactHandle) -> Result<OwnedMutexGuard<()>> {
        let node = self.node(handle)?;
        Ok(node.op_lock.clone().lock_owned().await)
    }

    /// Initiate start processing: transitions to `Starting` and returns
    /// the completion signal. The operation lock is held until
    /// [`finish_start`](ArtifactArena::finish_start) runs.
    pub async fn begin_start(&self, handle: ArtifactHandle) -> Result<StartSignal> {
        let node = self.node(handle)?;
        let guard = node.op_lock.clone().lock_owned().await;
        self.transition(handle, ArtifactState::Starting)?;

        let signal = StartSignal::new();
        *lock(&node.in_flight) = Some(InFlightStart {
            signal: signal.clone(),
            _guard: guard,
        });
        Ok(signal)
    }

    /// Record the outcome of an in-flight start: transitions the artifact,
    /// drives the signal (first drive wins), and releases the operation
    /// lock.
    pub fn finish_start(&self, handle: ArtifactHandle, outcome: StartOutcome) -> Result<()> {
        let node = self.node(handle)?;
        let in_flight = lock(&node.in_flight)
            .take()
            .ok_or(LifecycleError::NotStarting(handle))?;

        let to = match &outcome {
            StartOutcome::Completed => ArtifactState::Started,
            StartOutcome::Failed(_) => ArtifactState::StartFailed,
            StartOutcome::Aborted => ArtifactState::StartAborted,
        };
        self.transition(handle, to)?;
        in_flight.signal.drive(outcome);
        Ok(())
    }

    /// Abort an in-flight start: no error occurred, but it will not
    /// complete (e.g. the artifact is being stopped concurrently).
    pub fn abort_start(&self, handle: ArtifactHandle) -> Result<()> {
        self.finish_start(handle, StartOutcome::Aborted)
    }

    /// Remove a node from the arena, detaching it from all parents and
    /// children. Called after a successful uninstall.
    pub fn remove(&self, handle: ArtifactHandle) -> Result<()> {
        let node = self.node(handle)?;
        let edges = {
            let mut edges = write_lock(&node.edges);
            std::mem::take(&mut *edges)
        };
        for parent in edges.parents {
            if let Ok(parent_node) = self.node(parent) {
                write_lock(&parent_node.edges)
                    .children
                    .retain(|e| e.child != handle);
            }
        }
        for edge in edges.children {
            if let Ok(child_node) = self.node(edge.child) {
                write_lock(&child_node.edges).parents.retain(|p| *p != handle);
            }
        }
        self.nodes.remove(&handle);
        debug!(%handle, "artifact removed from arena");
        Ok(())
    }

    /// Handles of every node currently in the arena, in creation order.
    pub fn handles(&self) -> Vec<ArtifactHandle> {
        let mut handles: Vec<ArtifactHandle> =
            self.nodes.iter().map(|entry| *entry.key()).collect();
        handles.sort();
        handles
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Deployment event notifier.
//!
//! An explicit registry of listener handles: registration and
//! unregistration are the only mutations. Delivery is synchronous on the
//! emitting thread, in registration order; a panicking listener is caught,
//! logged, and skipped so it can never prevent delivery to the rest or
//! abort the operation that triggered the event. A `broadcast` mirror of
//! the envelope stream is exposed for management tooling.

use gantry_types::{DeployEvent, DeployEventEnvelope, EventSource};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// Channel capacity for the broadcast mirror
const MIRROR_CHANNEL_CAPACITY: usize = 4096;

/// A registered consumer of deployment events.
///
/// `on_event` runs on the thread that caused the transition; it should
/// return quickly and must not assume any particular thread.
pub trait DeploymentListener: Send + Sync {
    fn on_event(&self, event: &DeployEventEnvelope);
}

/// Opaque handle identifying a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl std::fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Synchronous, best-effort fan-out of deployment events.
pub struct Notifier {
    listeners: RwLock<Vec<(ListenerHandle, Arc<dyn DeploymentListener>)>>,
    next_handle: AtomicU64,
    mirror_tx: broadcast::Sender<DeployEventEnvelope>,
}

impl Notifier {
    pub fn new() -> Self {
        let (mirror_tx, _) = broadcast::channel(MIRROR_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(0),
            mirror_tx,
        }
    }

    /// Register a listener. It sees every event emitted after this call,
    /// after all listeners registered before it.
    pub fn register(&self, listener: Arc<dyn DeploymentListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((handle, listener));
        handle
    }

    /// Remove a registration. Returns whether the handle was known.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    /// Subscribe to the broadcast mirror of the envelope stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEventEnvelope> {
        self.mirror_tx.subscribe()
    }

    /// Deliver an event to every registered listener, in registration
    /// order, on the calling thread. All listeners see the event before
    /// this returns.
    pub fn emit(&self, event: DeployEvent, source: EventSource) {
        let envelope = DeployEventEnvelope::new(event, source);

        // Snapshot the registrations so listeners may register/unregister
        // from inside their callback without deadlocking.
        let snapshot: Vec<(ListenerHandle, Arc<dyn DeploymentListener>)> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (handle, listener) in snapshot {
            let delivery = catch_unwind(AssertUnwindSafe(|| listener.on_event(&envelope)));
            if delivery.is_err() {
                warn!(%handle, event_id = %envelope.id, "listener panicked; skipping");
            }
        }

        // No subscribers on the mirror is fine.
        let _ = self.mirror_tx.send(envelope);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

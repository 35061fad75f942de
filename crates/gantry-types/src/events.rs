//! Deployment events.
//!
//! Immutable records produced by the commit coordinator and the lifecycle
//! state machine, consumed by registered listeners and the broadcast
//! mirror.

use crate::artifact::ArtifactState;
use crate::module::ModuleId;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployEventKind {
    /// A deploy request started processing.
    Deploying,
    /// A deploy request committed successfully.
    Deployed,
    /// A deploy request failed and left no partial state behind.
    DeployFailed { reason: String },
    /// An undeploy request started processing.
    Undeploying,
    /// An undeploy request completed.
    Undeployed,
    /// One module was installed into the live graph.
    ModuleInstalled,
    /// One module was removed from the live graph.
    ModuleUninstalled,
    /// A failed commit was rolled back; the live graph is as before.
    RolledBack { reason: String },
    /// An install artifact moved between lifecycle states.
    StateChanged {
        artifact: String,
        from: ArtifactState,
        to: ArtifactState,
    },
}

/// Immutable record of a deployment event: kind, application identity,
/// version, and optionally the affected module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub kind: DeployEventKind,
    pub application: String,
    pub version: Version,
    pub module: Option<ModuleId>,
}

impl DeployEvent {
    pub fn new(kind: DeployEventKind, application: impl Into<String>, version: Version) -> Self {
        Self {
            kind,
            application: application.into(),
            version,
            module: None,
        }
    }

    pub fn for_module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }
}

/// Which subsystem emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Coordinator,
    Lifecycle,
}

/// Envelope carrying an event with id, timestamp, and source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployEventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub event: DeployEvent,
}

impl DeployEventEnvelope {
    pub fn new(event: DeployEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_carries_event() {
        let event = DeployEvent::new(DeployEventKind::Deployed, "shop", Version::new(2, 1, 0))
            .for_module(ModuleId::new("shop-core", Version::new(2, 1, 0)));
        let envelope = DeployEventEnvelope::new(event.clone(), EventSource::Coordinator);

        assert_eq!(envelope.event, event);
        assert_eq!(envelope.source, EventSource::Coordinator);
    }

    #[test]
    fn test_event_serializes() {
        let event = DeployEvent::new(
            DeployEventKind::DeployFailed {
                reason: "resolution incomplete".into(),
            },
            "shop",
            Version::new(1, 0, 0),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("resolution incomplete"));
    }
}

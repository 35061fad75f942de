//! Install-artifact identity and lifecycle states.
//!
//! Every deployable unit (a single module or a composite plan of modules)
//! carries a lifecycle state. The transition graph lives here so every
//! crate validates moves against the same table.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a deployable unit: type, name, version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactIdentity {
    /// Artifact type, e.g. `"module"` or `"plan"`.
    pub kind: String,
    pub name: String,
    pub version: Version,
}

impl ArtifactIdentity {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            version,
        }
    }

    pub fn module(name: impl Into<String>, version: Version) -> Self {
        Self::new("module", name, version)
    }

    pub fn plan(name: impl Into<String>, version: Version) -> Self {
        Self::new("plan", name, version)
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.kind, self.name, self.version)
    }
}

/// Lifecycle states of an install artifact.
///
/// Artifacts enter the machine at [`ArtifactState::Installing`];
/// [`ArtifactState::Uninstalled`] is terminal, and the `*Failed` states are
/// terminal unless retried back into the corresponding in-progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactState {
    Installing,
    Installed,
    InstallFailed,
    Resolving,
    Resolved,
    Unresolved,
    Starting,
    Started,
    StartFailed,
    StartAborted,
    Stopping,
    Stopped,
    StopFailed,
    Uninstalling,
    Uninstalled,
    UninstallFailed,
}

impl ArtifactState {
    /// Whether the transition graph permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ArtifactState) -> bool {
        use ArtifactState::*;
        matches!(
            (self, next),
            (Installing, Installed)
                | (Installing, InstallFailed)
                | (Installed, Resolving)
                | (Resolving, Resolved)
                | (Resolving, Unresolved)
                | (Resolved, Starting)
                | (Resolved, Uninstalling)
                | (Starting, Started)
                | (Starting, StartFailed)
                | (Starting, StartAborted)
                | (Started, Stopping)
                | (Stopping, Stopped)
                | (Stopping, StopFailed)
                | (Stopped, Starting)
                | (Stopped, Uninstalling)
                | (Uninstalling, Uninstalled)
                | (Uninstalling, UninstallFailed)
                // Retry edges out of otherwise-terminal states.
                | (InstallFailed, Installing)
                | (StartFailed, Starting)
                | (StartAborted, Starting)
                | (StopFailed, Stopping)
                | (UninstallFailed, Uninstalling)
                | (Unresolved, Resolving)
        )
    }

    /// Terminal unless explicitly retried.
    pub fn is_terminal(self) -> bool {
        use ArtifactState::*;
        matches!(
            self,
            Uninstalled | InstallFailed | StartFailed | StopFailed | UninstallFailed
        )
    }

    /// A failure state recorded from a lifecycle operation.
    pub fn is_failed(self) -> bool {
        use ArtifactState::*;
        matches!(self, InstallFailed | StartFailed | StopFailed | UninstallFailed)
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactState::Installing => "installing",
            ArtifactState::Installed => "installed",
            ArtifactState::InstallFailed => "install-failed",
            ArtifactState::Resolving => "resolving",
            ArtifactState::Resolved => "resolved",
            ArtifactState::Unresolved => "unresolved",
            ArtifactState::Starting => "starting",
            ArtifactState::Started => "started",
            ArtifactState::StartFailed => "start-failed",
            ArtifactState::StartAborted => "start-aborted",
            ArtifactState::Stopping => "stopping",
            ArtifactState::Stopped => "stopped",
            ArtifactState::StopFailed => "stop-failed",
            ArtifactState::Uninstalling => "uninstalling",
            ArtifactState::Uninstalled => "uninstalled",
            ArtifactState::UninstallFailed => "uninstall-failed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ArtifactState::*;

    #[test]
    fn test_happy_path_is_valid() {
        let path = [
            Installing,
            Installed,
            Resolving,
            Resolved,
            Starting,
            Started,
            Stopping,
            Stopped,
            Uninstalling,
            Uninstalled,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_started_requires_starting() {
        for state in [Installing, Installed, Resolved, Stopped, Uninstalling] {
            assert!(!state.can_transition_to(Started), "{state} -> started");
        }
        assert!(Starting.can_transition_to(Started));
    }

    #[test]
    fn test_stopped_requires_stopping() {
        assert!(!Started.can_transition_to(Stopped));
        assert!(Started.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_restart_after_stop() {
        assert!(Stopped.can_transition_to(Starting));
    }

    #[test]
    fn test_failed_states_allow_retry_only() {
        assert!(StartFailed.can_transition_to(Starting));
        assert!(!StartFailed.can_transition_to(Started));
        assert!(!StartFailed.can_transition_to(Stopping));
        assert!(StartFailed.is_terminal());
    }

    #[test]
    fn test_uninstalled_is_final() {
        assert!(Uninstalled.is_terminal());
        for state in [
            Installing, Installed, Resolving, Resolved, Starting, Started, Stopping, Stopped,
            Uninstalling,
        ] {
            assert!(!Uninstalled.can_transition_to(state));
        }
    }

    #[test]
    fn test_abort_is_distinct_from_failure() {
        assert!(Starting.can_transition_to(StartAborted));
        assert!(!StartAborted.is_failed());
        assert!(StartFailed.is_failed());
    }
}

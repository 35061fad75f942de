//! Resolution failure reports.
//!
//! Resolution-time problems are data, not errors: `resolve` and `diagnose`
//! return these, and they must be human-diagnosable without re-running
//! resolution.

use crate::module::{ModuleId, Requirement};
use crate::version::VersionRange;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a near-miss capability was rejected for a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Capability version falls outside the requirement's range.
    VersionOutOfRange { found: Version, range: VersionRange },

    /// A matching attribute was absent or unequal.
    AttributeMismatch { key: String },

    /// The capability restricts visibility and does not enumerate the
    /// consumer.
    NotVisible,

    /// Binding would expose two providers of one package to the consumer.
    UsesConflict { package: String },

    /// The providing module itself failed to resolve.
    ProviderUnresolved,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::VersionOutOfRange { found, range } => {
                write!(f, "version {found} outside range {range}")
            }
            RejectionReason::AttributeMismatch { key } => {
                write!(f, "attribute `{key}` missing or unequal")
            }
            RejectionReason::NotVisible => write!(f, "not visible to consumer"),
            RejectionReason::UsesConflict { package } => {
                write!(f, "uses conflict on package `{package}`")
            }
            RejectionReason::ProviderUnresolved => write!(f, "provider is unresolved"),
        }
    }
}

/// A capability that was considered for a requirement and rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub provider: ModuleId,
    pub capability_name: String,
    pub version: Version,
    pub reason: RejectionReason,
}

impl fmt::Display for RejectedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} `{}` {}: {}",
            self.provider, self.capability_name, self.version, self.reason
        )
    }
}

/// An unsatisfiable mandatory requirement: the module and requirement that
/// could not bind, plus every near-miss and why it was rejected. An empty
/// candidate list means nothing in the snapshot even shared the
/// requirement's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub module: ModuleId,
    pub requirement: Requirement,
    pub rejected: Vec<RejectedCandidate>,
}

impl ResolutionFailure {
    pub fn new(module: ModuleId, requirement: Requirement) -> Self {
        Self {
            module,
            requirement,
            rejected: Vec::new(),
        }
    }

    /// The most informative near-miss, if any candidate existed at all.
    pub fn best_near_miss(&self) -> Option<&RejectedCandidate> {
        self.rejected.first()
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: unresolved requirement [{}]",
            self.module, self.requirement
        )?;
        if self.rejected.is_empty() {
            write!(f, "; no candidates")
        } else {
            write!(f, "; rejected: ")?;
            for (i, candidate) in self.rejected.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{candidate}")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Namespace;

    #[test]
    fn test_failure_display_with_no_candidates() {
        let failure = ResolutionFailure::new(
            ModuleId::new("app", Version::new(1, 0, 0)),
            Requirement::new(Namespace::Package, "q", "[1.0,1.0]".parse().unwrap()),
        );
        let text = failure.to_string();
        assert!(text.contains("app@1.0.0"));
        assert!(text.contains("package q [1.0.0,1.0.0]"));
        assert!(text.contains("no candidates"));
    }

    #[test]
    fn test_failure_display_names_rejection() {
        let mut failure = ResolutionFailure::new(
            ModuleId::new("app", Version::new(1, 0, 0)),
            Requirement::new(Namespace::Package, "q", "[1.0,2.0)".parse().unwrap()),
        );
        failure.rejected.push(RejectedCandidate {
            provider: ModuleId::new("lib", Version::new(3, 0, 0)),
            capability_name: "q".to_string(),
            version: Version::new(3, 0, 0),
            reason: RejectionReason::VersionOutOfRange {
                found: Version::new(3, 0, 0),
                range: "[1.0,2.0)".parse().unwrap(),
            },
        });
        let text = failure.to_string();
        assert!(text.contains("lib@3.0.0"));
        assert!(text.contains("outside range"));
    }
}

//! The module graph model.
//!
//! A module is an immutable description of identity, provided capabilities,
//! and declared requirements. Modules are replaced, never mutated, on
//! update; the mutable wiring between them lives in snapshots and the live
//! graph, not here.

use crate::version::VersionRange;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Requirement name matching any capability name (dynamic requirements).
pub const DYNAMIC_NAME: &str = "*";

/// Directive naming the packages a capability's API re-exposes.
pub const DIRECTIVE_USES: &str = "uses";

/// Directive enumerating the only consumers allowed to see a capability.
pub const DIRECTIVE_VISIBLE_TO: &str = "visible-to";

/// Module identity: symbolic name plus version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub name: String,
    pub version: Version,
}

impl ModuleId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Isolation namespace partitioning the module graph. Capabilities in one
/// region are not visible from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region(String);

impl Region {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Region {
    fn default() -> Self {
        Self("root".to_string())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability/requirement namespaces. Host and module clauses resolve
/// before package imports, since package visibility depends on host
/// attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    /// An exported/imported code package.
    Package,
    /// A required module by symbolic name.
    Module,
    /// A fragment host attachment.
    Host,
    /// Extension namespaces.
    Other(String),
}

impl Namespace {
    /// Resolution phase ordering: lower phases bind first.
    pub fn phase(&self) -> u8 {
        match self {
            Namespace::Host => 0,
            Namespace::Module => 1,
            Namespace::Package => 2,
            Namespace::Other(_) => 3,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Package => write!(f, "package"),
            Namespace::Module => write!(f, "module"),
            Namespace::Host => write!(f, "host"),
            Namespace::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A named, versioned, attributed thing a module provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub namespace: Namespace,
    pub name: String,
    pub version: Version,

    /// Arbitrary attributes used in requirement matching.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Directives controlling resolution behavior (`uses`, `visible-to`).
    #[serde(default)]
    pub directives: BTreeMap<String, String>,
}

impl Capability {
    pub fn new(namespace: Namespace, name: impl Into<String>, version: Version) -> Self {
        Self {
            namespace,
            name: name.into(),
            version,
            attributes: BTreeMap::new(),
            directives: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(key.into(), value.into());
        self
    }

    /// Package names this capability's API exposes from its own wiring.
    pub fn uses(&self) -> Vec<&str> {
        self.directives
            .get(DIRECTIVE_USES)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Consumers allowed to see this capability, if restricted.
    pub fn visible_to(&self) -> Option<Vec<&str>> {
        self.directives.get(DIRECTIVE_VISIBLE_TO).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    /// The matching predicate: namespace equality, name equality (or
    /// wildcard for dynamic requirements), version range containment,
    /// every requirement attribute present with an equal value, and any
    /// `visible-to` restriction honored for `consumer`.
    ///
    /// Pure; safe to call concurrently from multiple resolution attempts.
    pub fn matches(&self, requirement: &Requirement, consumer: &str) -> bool {
        if self.namespace != requirement.namespace {
            return false;
        }
        if requirement.name != DYNAMIC_NAME && self.name != requirement.name {
            return false;
        }
        if !requirement.range.contains(&self.version) {
            return false;
        }
        for (key, value) in &requirement.attributes {
            if self.attributes.get(key) != Some(value) {
                return false;
            }
        }
        if let Some(allowed) = self.visible_to() {
            if !allowed.contains(&consumer) {
                return false;
            }
        }
        true
    }
}

/// A constraint a module declares on some other module's capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub namespace: Namespace,

    /// Target capability name, or [`DYNAMIC_NAME`] for dynamic requirements.
    pub name: String,

    /// Acceptable provider versions.
    #[serde(default)]
    pub range: VersionRange,

    /// Mandatory requirements must bind for the module to resolve;
    /// optional ones may end up with no wire.
    pub mandatory: bool,

    /// Attributes a satisfying capability must carry.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Requirement {
    pub fn new(namespace: Namespace, name: impl Into<String>, range: VersionRange) -> Self {
        Self {
            namespace,
            name: name.into(),
            range,
            mandatory: true,
            attributes: BTreeMap::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.namespace, self.name, self.range)?;
        if !self.mandatory {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}

/// A module as described at deploy time, before it is assigned an install
/// order. This is what callers hand to a snapshot's `install`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            id: ModuleId::new(name, version),
            region: Region::default(),
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    pub fn in_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Convenience: export a package capability.
    pub fn exports_package(self, name: impl Into<String>, version: Version) -> Self {
        self.with_capability(Capability::new(Namespace::Package, name, version))
    }

    /// Convenience: declare a mandatory package import.
    pub fn imports_package(self, name: impl Into<String>, range: VersionRange) -> Self {
        self.with_requirement(Requirement::new(Namespace::Package, name, range))
    }

    /// Convenience: declare a mandatory require-module clause.
    pub fn requires_module(self, name: impl Into<String>, range: VersionRange) -> Self {
        self.with_requirement(Requirement::new(Namespace::Module, name, range))
    }

    /// Convenience: provide this module's own symbolic name as a module
    /// capability, so require-module clauses can bind to it.
    pub fn provides_module_capability(mut self) -> Self {
        let cap = Capability::new(
            Namespace::Module,
            self.id.name.clone(),
            self.id.version.clone(),
        );
        self.capabilities.push(cap);
        self
    }
}

/// An installed module: immutable identity, capabilities, requirements,
/// region, and the install-order sequence number assigned at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub region: Region,
    pub capabilities: Vec<Capability>,
    pub requirements: Vec<Requirement>,

    /// Monotonic install sequence; the deterministic tie-break for
    /// candidate ordering.
    pub install_order: u64,
}

impl Module {
    pub fn from_descriptor(descriptor: ModuleDescriptor, install_order: u64) -> Self {
        Self {
            id: descriptor.id,
            region: descriptor.region,
            capabilities: descriptor.capabilities,
            requirements: descriptor.requirements,
            install_order,
        }
    }
}

/// A resolved binding: `consumer`'s requirement at `requirement_index` is
/// satisfied by `provider`'s capability at `capability_index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Wire {
    pub consumer: ModuleId,
    pub requirement_index: usize,
    pub provider: ModuleId,
    pub capability_index: usize,
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[req {}] -> {}[cap {}]",
            self.consumer, self.requirement_index, self.provider, self.capability_index
        )
    }
}

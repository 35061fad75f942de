//! Module runtime abstraction.
//!
//! The coordinator drives install/uninstall and start/stop through a
//! runtime trait so the commit protocol can be exercised against an
//! in-memory fake. A real runtime would load code; the protocol does not
//! care.

use crate::error::{DeployError, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use gantry_lifecycle::{StartExecutor, StartSignal};
use gantry_types::{ArtifactIdentity, Module, ModuleId};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Runtime-assigned handle for an installed module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    pub id: u64,
    pub module: ModuleId,
}

impl std::fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime-{}:{}", self.id, self.module)
    }
}

/// Installs and removes module code.
///
/// `install` must either fully install or fail with nothing retained;
/// partial installs are the runtime's problem, not the coordinator's.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    async fn install(&self, location: &str, module: &Module) -> Result<ModuleHandle>;
    async fn uninstall(&self, handle: &ModuleHandle) -> Result<()>;

    /// Identities currently installed, for reconciliation checks.
    fn installed(&self) -> Vec<ModuleId>;
}

/// In-memory runtime with injectable failures.
pub struct InMemoryModuleRuntime {
    modules: DashMap<u64, ModuleId>,
    next_handle: AtomicU64,
    fail_install: DashSet<String>,
    fail_uninstall: DashSet<String>,
    fail_start: DashSet<String>,
}

impl InMemoryModuleRuntime {
    pub fn new() -> Self {
        Self {
            modules: DashMap::new(),
            next_handle: AtomicU64::new(0),
            fail_install: DashSet::new(),
            fail_uninstall: DashSet::new(),
            fail_start: DashSet::new(),
        }
    }

    /// Make every install of a module with this name fail.
    pub fn inject_install_failure(&self, name: impl Into<String>) {
        self.fail_install.insert(name.into());
    }

    /// Make every uninstall of a module with this name fail.
    pub fn inject_uninstall_failure(&self, name: impl Into<String>) {
        self.fail_uninstall.insert(name.into());
    }

    /// Make every start of an artifact with this name fail.
    pub fn inject_start_failure(&self, name: impl Into<String>) {
        self.fail_start.insert(name.into());
    }
}

impl Default for InMemoryModuleRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleRuntime for InMemoryModuleRuntime {
    async fn install(&self, location: &str, module: &Module) -> Result<ModuleHandle> {
        if self.fail_install.contains(&module.id.name) {
            return Err(DeployError::Runtime(format!(
                "install of {} from {location} refused",
                module.id
            )));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.modules.insert(id, module.id.clone());
        debug!(module = %module.id, handle = id, "runtime installed module");
        Ok(ModuleHandle {
            id,
            module: module.id.clone(),
        })
    }

    async fn uninstall(&self, handle: &ModuleHandle) -> Result<()> {
        if self.fail_uninstall.contains(&handle.module.name) {
            return Err(DeployError::Runtime(format!(
                "uninstall of {} refused",
                handle.module
            )));
        }
        self.modules.remove(&handle.id);
        debug!(module = %handle.module, handle = handle.id, "runtime uninstalled module");
        Ok(())
    }

    fn installed(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.modules.iter().map(|e| e.value().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl StartExecutor for InMemoryModuleRuntime {
    async fn start(
        &self,
        identity: &ArtifactIdentity,
        signal: StartSignal,
    ) -> gantry_lifecycle::Result<()> {
        if self.fail_start.contains(&identity.name) {
            signal.fail(format!("{} refused to start", identity.name));
        } else {
            signal.complete();
        }
        Ok(())
    }

    async fn stop(&self, _identity: &ArtifactIdentity) -> gantry_lifecycle::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_types::ModuleDescriptor;
    use semver::Version;

    fn module(name: &str) -> Module {
        Module::from_descriptor(ModuleDescriptor::new(name, Version::new(1, 0, 0)), 0)
    }

    #[tokio::test]
    async fn test_install_uninstall_round_trip() {
        let runtime = InMemoryModuleRuntime::new();
        let handle = runtime.install("mem:a", &module("a")).await.unwrap();
        assert_eq!(runtime.installed().len(), 1);

        runtime.uninstall(&handle).await.unwrap();
        assert!(runtime.installed().is_empty());
    }

    #[tokio::test]
    async fn test_injected_install_failure() {
        let runtime = InMemoryModuleRuntime::new();
        runtime.inject_install_failure("bad");

        assert!(runtime.install("mem:bad", &module("bad")).await.is_err());
        assert!(runtime.install("mem:good", &module("good")).await.is_ok());
    }
}

//! The quasi-framework: a disposable working snapshot of the module graph.
//!
//! A snapshot owns copies of the committed base modules plus a delta of
//! speculatively installed ones, and its own wire set. Nothing in here
//! references live state, so dropping a snapshot (or failing to commit it)
//! leaves the live graph exactly as it was — isolation holds by
//! construction.

use crate::error::{Result, SnapshotError};
use crate::resolver::{self, Resolution};
use gantry_types::{Module, ModuleDescriptor, ModuleId, ResolutionFailure, Wire};
use std::sync::Arc;
use tracing::debug;

/// A mutable, disposable overlay of the module graph.
///
/// Lifecycle: created empty or seeded from live state, mutated by
/// [`install`](QuasiFramework::install) calls, resolved (idempotent,
/// re-runnable), then either committed by the coordinator or
/// [`destroy`](QuasiFramework::destroy)ed with no side effects.
#[derive(Debug)]
pub struct QuasiFramework {
    base: Vec<Arc<Module>>,
    delta: Vec<Arc<Module>>,
    wires: Vec<Wire>,
    failures: Vec<ResolutionFailure>,
    resolved: bool,
    next_order: u64,
}

impl QuasiFramework {
    /// An empty snapshot with no base modules.
    pub fn new() -> Self {
        Self::seeded(Vec::new())
    }

    /// A snapshot seeded from a copy of the committed module set.
    pub fn seeded(base: Vec<Arc<Module>>) -> Self {
        let next_order = base
            .iter()
            .map(|m| m.install_order + 1)
            .max()
            .unwrap_or(0);
        Self {
            base,
            delta: Vec::new(),
            wires: Vec::new(),
            failures: Vec::new(),
            resolved: false,
            next_order,
        }
    }

    /// Speculatively install a module into the delta. Assigns the next
    /// install-order sequence number.
    pub fn install(&mut self, descriptor: ModuleDescriptor) -> Result<ModuleId> {
        if self.modules().any(|m| m.id == descriptor.id) {
            return Err(SnapshotError::DuplicateModule(descriptor.id));
        }
        let module = Module::from_descriptor(descriptor, self.next_order);
        self.next_order += 1;
        let id = module.id.clone();
        self.delta.push(Arc::new(module));
        self.resolved = false;
        debug!(module = %id, "installed into snapshot delta");
        Ok(id)
    }

    /// Resolve the whole working set (base + delta). Idempotent: repeated
    /// calls on an unchanged snapshot yield identical wires and failures,
    /// in identical order.
    pub fn resolve(&mut self) -> Vec<ResolutionFailure> {
        let working_set: Vec<Arc<Module>> = self.modules().cloned().collect();
        let Resolution { wires, failures } = resolver::resolve(&working_set);
        self.wires = wires;
        self.failures = failures;
        self.resolved = true;
        self.failures.clone()
    }

    /// Re-run resolution scoped to one module's requirement closure, for
    /// reporting. Does not touch the snapshot's own wires.
    pub fn diagnose(&self, module: &ModuleId) -> Vec<ResolutionFailure> {
        let working_set: Vec<Arc<Module>> = self.modules().cloned().collect();
        resolver::diagnose(&working_set, module)
    }

    /// Whether `resolve` has run since the last mutation.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Failures from the last `resolve` run.
    pub fn failures(&self) -> &[ResolutionFailure] {
        &self.failures
    }

    /// Wires from the last `resolve` run.
    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    /// All modules in the working set: base first, then delta.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.base.iter().chain(self.delta.iter())
    }

    /// The committed base the snapshot was seeded from.
    pub fn base_modules(&self) -> &[Arc<Module>] {
        &self.base
    }

    /// Speculatively installed modules only.
    pub fn delta_modules(&self) -> &[Arc<Module>] {
        &self.delta
    }

    /// Discard the snapshot. Always safe, even mid-plan: the snapshot owns
    /// every piece of its state, so no live structure is affected.
    pub fn destroy(self) {
        debug!(
            base = self.base.len(),
            delta = self.delta.len(),
            "snapshot destroyed"
        );
    }
}

impl Default for QuasiFramework {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn v(major: u64, minor: u64) -> Version {
        Version::new(major, minor, 0)
    }

    fn descriptor(name: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(name, v(1, 0))
    }

    #[test]
    fn test_install_assigns_monotonic_order() {
        let mut snapshot = QuasiFramework::new();
        snapshot.install(descriptor("a")).unwrap();
        snapshot.install(descriptor("b")).unwrap();

        let orders: Vec<u64> = snapshot.modules().map(|m| m.install_order).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_seeded_orders_after_base() {
        let base = vec![Arc::new(Module::from_descriptor(descriptor("base"), 7))];
        let mut snapshot = QuasiFramework::seeded(base);
        snapshot.install(descriptor("delta")).unwrap();

        assert_eq!(snapshot.delta_modules()[0].install_order, 8);
    }

    #[test]
    fn test_duplicate_install_rejected() {
        let mut snapshot = QuasiFramework::new();
        snapshot.install(descriptor("a")).unwrap();
        let err = snapshot.install(descriptor("a")).unwrap_err();
        assert!(matches!(err, SnapshotError::DuplicateModule(_)));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut snapshot = QuasiFramework::new();
        snapshot
            .install(descriptor("lib").exports_package("p", v(1, 0)))
            .unwrap();
        snapshot
            .install(descriptor("app").imports_package("p", "[1.0,2.0)".parse().unwrap()))
            .unwrap();
        snapshot
            .install(descriptor("broken").imports_package("absent", "1.0".parse().unwrap()))
            .unwrap();

        let first_failures = snapshot.resolve();
        let first_wires = snapshot.wires().to_vec();
        let second_failures = snapshot.resolve();
        let second_wires = snapshot.wires().to_vec();

        assert_eq!(first_failures, second_failures);
        assert_eq!(first_wires, second_wires);
    }

    #[test]
    fn test_install_invalidates_resolution() {
        let mut snapshot = QuasiFramework::new();
        snapshot.install(descriptor("a")).unwrap();
        snapshot.resolve();
        assert!(snapshot.is_resolved());

        snapshot.install(descriptor("b")).unwrap();
        assert!(!snapshot.is_resolved());
    }

    #[test]
    fn test_destroy_leaves_seed_untouched() {
        let base = vec![Arc::new(Module::from_descriptor(
            descriptor("live").exports_package("p", v(1, 0)),
            0,
        ))];
        let before = base.clone();

        let mut snapshot = QuasiFramework::seeded(base.clone());
        snapshot.install(descriptor("speculative")).unwrap();
        snapshot.resolve();
        snapshot.destroy();

        // The seed vector the caller kept is bit-for-bit what it was.
        assert_eq!(before.len(), base.len());
        for (a, b) in before.iter().zip(base.iter()) {
            assert_eq!(a, b);
        }
    }
}

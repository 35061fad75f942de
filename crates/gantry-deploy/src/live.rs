//! The live module graph.
//!
//! The committed truth: modules and wires visible to running code. Only
//! the commit coordinator mutates it, under its commit lock; everything
//! else reads cheap snapshots. An epoch counter increments on every
//! mutation so open change sets can detect staleness.

use gantry_types::{Module, ModuleId, Wire};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct LiveState {
    modules: BTreeMap<ModuleId, Arc<Module>>,
    wires: Vec<Wire>,
    epoch: u64,
}

/// The committed module graph.
#[derive(Debug, Default)]
pub struct LiveGraph {
    state: RwLock<LiveState>,
}

impl LiveGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LiveState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LiveState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutation counter; changes whenever the graph does.
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Copy of the committed module set, in install order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let state = self.read();
        let mut modules: Vec<Arc<Module>> = state.modules.values().cloned().collect();
        modules.sort_by_key(|m| m.install_order);
        modules
    }

    pub fn wires(&self) -> Vec<Wire> {
        self.read().wires.clone()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.read().modules.contains_key(id)
    }

    pub fn get(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.read().modules.get(id).cloned()
    }

    /// Merge a committed change in one step: add the new modules and
    /// replace the wire set with the resolution that covers them.
    pub fn install_batch(&self, modules: Vec<Arc<Module>>, wires: Vec<Wire>) {
        let mut state = self.write();
        for module in modules {
            state.modules.insert(module.id.clone(), module);
        }
        state.wires = wires;
        state.epoch += 1;
    }

    /// Remove one module and every wire touching it.
    pub fn remove(&self, id: &ModuleId) -> Option<Arc<Module>> {
        let mut state = self.write();
        let removed = state.modules.remove(id);
        if removed.is_some() {
            state.wires.retain(|w| w.consumer != *id && w.provider != *id);
            state.epoch += 1;
        }
        removed
    }
}

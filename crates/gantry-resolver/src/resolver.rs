//! The resolution simulator.
//!
//! Binds every mandatory requirement of every module in a working set to
//! exactly one capability, or reports precisely why it cannot. The binding
//! pass is greedy with per-candidate backtracking; a fixpoint loop strips
//! the capabilities of unresolved modules so failures propagate to their
//! root cause instead of cascading through dependents.
//!
//! Everything here is pure computation over the module list it is handed:
//! no shared state, deterministic candidate order, identical output for
//! identical input.

use gantry_types::{
    Capability, Module, ModuleId, Namespace, Region, RejectedCandidate, RejectionReason,
    Requirement, ResolutionFailure, Wire, DYNAMIC_NAME,
};
use semver::Version;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of resolving a working set: the consistent wires plus one
/// failure per irreducibly-unsatisfiable mandatory requirement.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub wires: Vec<Wire>,
    pub failures: Vec<ResolutionFailure>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolve a working set of modules.
///
/// Returns identical wires and failures, in identical order, for repeated
/// calls on an unchanged set.
pub fn resolve(modules: &[Arc<Module>]) -> Resolution {
    let mut excluded: BTreeSet<ModuleId> = BTreeSet::new();
    let mut root_failures: Option<Vec<ResolutionFailure>> = None;

    loop {
        let pass = Binder::new(modules, &excluded).run();

        // Failures of the first pass happened with every capability still
        // on the table, so they are the root causes; later passes only add
        // cascade failures, which are not separately reported.
        if root_failures.is_none() {
            root_failures = Some(pass.failures.clone());
        }

        let newly: Vec<ModuleId> = pass
            .failures
            .iter()
            .map(|f| f.module.clone())
            .filter(|id| !excluded.contains(id))
            .collect();

        if newly.is_empty() {
            let failures = root_failures.unwrap_or_default();
            debug!(
                wires = pass.wires.len(),
                failures = failures.len(),
                "resolution pass complete"
            );
            return Resolution {
                wires: pass.wires,
                failures,
            };
        }
        excluded.extend(newly);
    }
}

/// Re-run resolution scoped to one module's requirement closure, for
/// reporting. Returns the failures of the module itself and of any module
/// in its closure whose failure is blocking it.
pub fn diagnose(modules: &[Arc<Module>], target: &ModuleId) -> Vec<ResolutionFailure> {
    let closure = requirement_closure(modules, target);
    resolve(modules)
        .failures
        .into_iter()
        .filter(|f| closure.contains(&f.module))
        .collect()
}

/// Modules reachable from `target` through candidate providers of its
/// requirements, transitively. Includes `target`.
fn requirement_closure(modules: &[Arc<Module>], target: &ModuleId) -> BTreeSet<ModuleId> {
    let by_id: HashMap<&ModuleId, &Arc<Module>> =
        modules.iter().map(|m| (&m.id, m)).collect();
    let mut closure: BTreeSet<ModuleId> = BTreeSet::new();
    let mut queue: Vec<ModuleId> = vec![target.clone()];

    while let Some(id) = queue.pop() {
        if !closure.insert(id.clone()) {
            continue;
        }
        let Some(module) = by_id.get(&id) else { continue };
        for requirement in &module.requirements {
            for provider in modules {
                if provider.region != module.region || closure.contains(&provider.id) {
                    continue;
                }
                let satisfies = provider
                    .capabilities
                    .iter()
                    .any(|c| match_reason(c, requirement, &module.id.name).is_none());
                if satisfies {
                    queue.push(provider.id.clone());
                }
            }
        }
    }
    closure
}

/// A capability considered for binding.
#[derive(Debug, Clone)]
struct Candidate {
    provider: ModuleId,
    provider_order: u64,
    capability_index: usize,
    version: Version,
}

struct PassOutcome {
    wires: Vec<Wire>,
    failures: Vec<ResolutionFailure>,
}

/// One greedy binding pass over the working set.
struct Binder<'a> {
    by_id: HashMap<&'a ModuleId, &'a Arc<Module>>,
    /// All capabilities, keyed by region + namespace + name. Built over the
    /// full set so excluded providers still show up as near-misses.
    index: HashMap<(Region, Namespace, String), Vec<Candidate>>,
    excluded: &'a BTreeSet<ModuleId>,
    /// Provider already chosen elsewhere for the same requirement name;
    /// preferring it minimizes re-wiring.
    affinity: HashMap<(Namespace, String), ModuleId>,
    /// Per consumer: package name -> provider module. A candidate that
    /// remaps a bound package to a different provider is a uses conflict.
    package_space: HashMap<ModuleId, BTreeMap<String, ModuleId>>,
    wires: Vec<Wire>,
    ordered: Vec<&'a Arc<Module>>,
}

impl<'a> Binder<'a> {
    fn new(modules: &'a [Arc<Module>], excluded: &'a BTreeSet<ModuleId>) -> Self {
        let by_id = modules.iter().map(|m| (&m.id, m)).collect();

        let mut index: HashMap<(Region, Namespace, String), Vec<Candidate>> = HashMap::new();
        for module in modules {
            for (capability_index, capability) in module.capabilities.iter().enumerate() {
                let key = (
                    module.region.clone(),
                    capability.namespace.clone(),
                    capability.name.clone(),
                );
                index.entry(key).or_default().push(Candidate {
                    provider: module.id.clone(),
                    provider_order: module.install_order,
                    capability_index,
                    version: capability.version.clone(),
                });
            }
        }

        let mut ordered: Vec<&Arc<Module>> = modules
            .iter()
            .filter(|m| !excluded.contains(&m.id))
            .collect();
        ordered.sort_by_key(|m| m.install_order);

        Self {
            by_id,
            index,
            excluded,
            affinity: HashMap::new(),
            package_space: HashMap::new(),
            wires: Vec::new(),
            ordered,
        }
    }

    fn run(mut self) -> PassOutcome {
        let mut failures = Vec::new();
        let mut failed_modules: BTreeSet<ModuleId> = BTreeSet::new();
        let ordered = std::mem::take(&mut self.ordered);

        for module in ordered {
            // Host and required-module clauses bind before package imports,
            // since package visibility depends on host attachment.
            let mut req_order: Vec<usize> = (0..module.requirements.len()).collect();
            req_order.sort_by_key(|&i| (module.requirements[i].namespace.phase(), i));

            let mut module_failed = false;
            for req_index in req_order {
                let requirement = &module.requirements[req_index];
                if let Some(failure) = self.bind_requirement(module, req_index, requirement) {
                    failures.push(failure);
                    module_failed = true;
                }
            }
            if module_failed {
                failed_modules.insert(module.id.clone());
            }
        }

        // Wires of unresolved consumers do not survive the pass.
        self.wires.retain(|w| !failed_modules.contains(&w.consumer));

        PassOutcome {
            wires: self.wires,
            failures,
        }
    }

    /// Try each candidate in order; first acceptable one wins. Returns the
    /// failure report when a mandatory requirement has no survivor.
    fn bind_requirement(
        &mut self,
        module: &Arc<Module>,
        req_index: usize,
        requirement: &Requirement,
    ) -> Option<ResolutionFailure> {
        let candidates = self.candidates_for(module, requirement);
        let mut rejected = Vec::new();

        for candidate in candidates {
            let provider = self.by_id[&candidate.provider];
            let capability = &provider.capabilities[candidate.capability_index];

            if self.excluded.contains(&candidate.provider) {
                rejected.push(reject(&candidate, capability, RejectionReason::ProviderUnresolved));
                continue;
            }
            if let Some(reason) = match_reason(capability, requirement, &module.id.name) {
                rejected.push(reject(&candidate, capability, reason));
                continue;
            }
            match self.uses_constraints(&module.id, capability, &candidate.provider) {
                Err(package) => {
                    rejected.push(reject(
                        &candidate,
                        capability,
                        RejectionReason::UsesConflict { package },
                    ));
                    continue;
                }
                Ok(constraints) => {
                    trace!(
                        consumer = %module.id,
                        provider = %candidate.provider,
                        requirement = %requirement,
                        "bound requirement"
                    );
                    self.accept(module, req_index, requirement, &candidate, constraints);
                    return None;
                }
            }
        }

        if requirement.mandatory {
            Some(ResolutionFailure {
                module: module.id.clone(),
                requirement: requirement.clone(),
                rejected,
            })
        } else {
            // Satisfied-optional: zero wires is fine.
            None
        }
    }

    /// Candidates for a requirement, in binding-preference order: affinity
    /// first, then highest version, then provider install order.
    fn candidates_for(&self, module: &Module, requirement: &Requirement) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = if requirement.name == DYNAMIC_NAME {
            let mut keys: Vec<&(Region, Namespace, String)> = self
                .index
                .keys()
                .filter(|(region, namespace, _)| {
                    *region == module.region && *namespace == requirement.namespace
                })
                .collect();
            keys.sort();
            keys.into_iter()
                .flat_map(|key| self.index[key].iter().cloned())
                .collect()
        } else {
            self.index
                .get(&(
                    module.region.clone(),
                    requirement.namespace.clone(),
                    requirement.name.clone(),
                ))
                .cloned()
                .unwrap_or_default()
        };

        let preferred = self
            .affinity
            .get(&(requirement.namespace.clone(), requirement.name.clone()))
            .cloned();
        candidates.sort_by(|a, b| {
            let a_affinity = Some(&a.provider) == preferred.as_ref();
            let b_affinity = Some(&b.provider) == preferred.as_ref();
            b_affinity
                .cmp(&a_affinity)
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.provider_order.cmp(&b.provider_order))
                .then_with(|| a.capability_index.cmp(&b.capability_index))
        });
        candidates
    }

    /// Package-space constraints this binding would impose on the consumer:
    /// the capability's own package plus everything its `uses` closure
    /// exposes from the provider's view. `Err` names the conflicting
    /// package.
    fn uses_constraints(
        &self,
        consumer: &ModuleId,
        capability: &Capability,
        provider: &ModuleId,
    ) -> Result<Vec<(String, ModuleId)>, String> {
        if capability.namespace != Namespace::Package {
            return Ok(Vec::new());
        }

        let mut proposed = vec![(capability.name.clone(), provider.clone())];
        for used in capability.uses() {
            if let Some(seen_through) = self.provider_view(provider, used) {
                proposed.push((used.to_string(), seen_through));
            }
        }

        if let Some(space) = self.package_space.get(consumer) {
            for (package, through) in &proposed {
                if let Some(existing) = space.get(package) {
                    if existing != through {
                        return Err(package.clone());
                    }
                }
            }
        }
        Ok(proposed)
    }

    /// The provider module's own view of `package`: the provider of its
    /// wire for that package, or itself if it exports the package.
    fn provider_view(&self, provider: &ModuleId, package: &str) -> Option<ModuleId> {
        for wire in &self.wires {
            if wire.consumer != *provider {
                continue;
            }
            let upstream = self.by_id[&wire.provider];
            let capability = &upstream.capabilities[wire.capability_index];
            if capability.namespace == Namespace::Package && capability.name == package {
                return Some(wire.provider.clone());
            }
        }
        let own = self.by_id.get(provider)?;
        own.capabilities
            .iter()
            .any(|c| c.namespace == Namespace::Package && c.name == package)
            .then(|| provider.clone())
    }

    fn accept(
        &mut self,
        module: &Arc<Module>,
        req_index: usize,
        requirement: &Requirement,
        candidate: &Candidate,
        constraints: Vec<(String, ModuleId)>,
    ) {
        self.wires.push(Wire {
            consumer: module.id.clone(),
            requirement_index: req_index,
            provider: candidate.provider.clone(),
            capability_index: candidate.capability_index,
        });
        self.affinity.insert(
            (requirement.namespace.clone(), requirement.name.clone()),
            candidate.provider.clone(),
        );
        let space = self.package_space.entry(module.id.clone()).or_default();
        for (package, through) in constraints {
            space.insert(package, through);
        }
    }
}

fn reject(
    candidate: &Candidate,
    capability: &Capability,
    reason: RejectionReason,
) -> RejectedCandidate {
    RejectedCandidate {
        provider: candidate.provider.clone(),
        capability_name: capability.name.clone(),
        version: capability.version.clone(),
        reason,
    }
}

/// Granular form of [`Capability::matches`]: `None` when the capability
/// satisfies the requirement, otherwise the first reason it does not.
fn match_reason(
    capability: &Capability,
    requirement: &Requirement,
    consumer: &str,
) -> Option<RejectionReason> {
    if capability.namespace != requirement.namespace {
        // Unreachable through the index, which is keyed by namespace, but
        // kept for the closure walk which scans capabilities directly.
        return Some(RejectionReason::AttributeMismatch {
            key: "namespace".to_string(),
        });
    }
    if requirement.name != DYNAMIC_NAME && capability.name != requirement.name {
        return Some(RejectionReason::AttributeMismatch {
            key: "name".to_string(),
        });
    }
    if !requirement.range.contains(&capability.version) {
        return Some(RejectionReason::VersionOutOfRange {
            found: capability.version.clone(),
            range: requirement.range.clone(),
        });
    }
    for (key, value) in &requirement.attributes {
        if capability.attributes.get(key) != Some(value) {
            return Some(RejectionReason::AttributeMismatch { key: key.clone() });
        }
    }
    if let Some(allowed) = capability.visible_to() {
        if !allowed.contains(&consumer) {
            return Some(RejectionReason::NotVisible);
        }
    }
    None
}

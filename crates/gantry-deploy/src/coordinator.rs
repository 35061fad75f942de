//! The commit coordinator.
//!
//! All mutation of the live graph funnels through here: open a change set
//! (a disposable snapshot of the committed modules), speculate against it,
//! then commit. Commit re-resolves, installs the delta through the module
//! runtime in dependency order, and on any install failure uninstalls what
//! this commit installed before reporting the error — the live graph gains
//! all of a change set or none of it.

use crate::error::{DeployError, Result};
use crate::live::LiveGraph;
use crate::runtime::{ModuleHandle, ModuleRuntime};
use dashmap::DashMap;
use gantry_lifecycle::{
    start_plan, stop_plan, ArtifactArena, ArtifactHandle, DeploymentListener, ListenerHandle,
    Notifier, PlanMode, PlanStartReport, StartExecutor,
};
use gantry_resolver::QuasiFramework;
use gantry_types::{
    ArtifactIdentity, ArtifactState, DeployEvent, DeployEventEnvelope, DeployEventKind,
    EventSource, Module, ModuleDescriptor, ModuleId, ResolutionFailure, Wire,
};
use semver::Version;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

const DEFAULT_CHILD_TIMEOUT: Duration = Duration::from_secs(30);

/// An open, uncommitted change against the live graph.
///
/// Owns a snapshot seeded from the committed modules at open time plus the
/// epoch observed then; commit rejects the change if the live graph moved
/// in between. Dropping or discarding a change set has no effect on
/// anything.
pub struct ChangeSet {
    snapshot: QuasiFramework,
    epoch: u64,
}

impl ChangeSet {
    /// Speculatively install a module into this change.
    pub fn install(&mut self, descriptor: ModuleDescriptor) -> Result<ModuleId> {
        Ok(self.snapshot.install(descriptor)?)
    }

    /// Resolve the working set. Idempotent; failures are diagnostic until
    /// commit, which re-resolves and enforces them.
    pub fn resolve(&mut self) -> Vec<ResolutionFailure> {
        self.snapshot.resolve()
    }

    /// Failure diagnosis scoped to one module's requirement closure.
    pub fn diagnose(&self, module: &ModuleId) -> Vec<ResolutionFailure> {
        self.snapshot.diagnose(module)
    }

    pub fn wires(&self) -> &[Wire] {
        self.snapshot.wires()
    }

    /// Throw the change away. Never affects the live graph.
    pub fn discard(self) {
        self.snapshot.destroy();
    }
}

struct AppRecord {
    plan: ArtifactHandle,
    version: Version,
    modules: Vec<ModuleId>,
}

/// Orchestrates speculative resolution, atomic commit, and application
/// lifecycle against one live graph.
pub struct DeployCoordinator {
    live: Arc<LiveGraph>,
    runtime: Arc<dyn ModuleRuntime>,
    executor: Arc<dyn StartExecutor>,
    arena: Arc<ArtifactArena>,
    notifier: Arc<Notifier>,
    /// Serializes commits; readers never take it.
    commit_lock: Mutex<()>,
    apps: DashMap<String, AppRecord>,
    module_artifacts: DashMap<ModuleId, (ArtifactHandle, ModuleHandle)>,
    child_timeout: Duration,
}

impl DeployCoordinator {
    pub fn new(runtime: Arc<dyn ModuleRuntime>, executor: Arc<dyn StartExecutor>) -> Self {
        let notifier = Arc::new(Notifier::new());
        Self {
            live: Arc::new(LiveGraph::new()),
            runtime,
            executor,
            arena: Arc::new(ArtifactArena::new(notifier.clone())),
            notifier,
            commit_lock: Mutex::new(()),
            apps: DashMap::new(),
            module_artifacts: DashMap::new(),
            child_timeout: DEFAULT_CHILD_TIMEOUT,
        }
    }

    pub fn with_child_timeout(mut self, timeout: Duration) -> Self {
        self.child_timeout = timeout;
        self
    }

    /// Open a change set against the current committed state.
    pub fn begin_change(&self) -> ChangeSet {
        ChangeSet {
            snapshot: QuasiFramework::seeded(self.live.modules()),
            epoch: self.live.epoch(),
        }
    }

    /// Commit a change set: re-resolve, install the delta provider-first,
    /// merge into the live graph. On install failure everything installed
    /// by this call is uninstalled before the error is returned.
    #[instrument(skip(self, change))]
    pub async fn commit(&self, change: ChangeSet) -> Result<Vec<ModuleId>> {
        let _guard = self.commit_lock.lock().await;

        if self.live.epoch() != change.epoch {
            change.discard();
            return Err(DeployError::StaleSnapshot);
        }

        let mut snapshot = change.snapshot;
        let failures = snapshot.resolve();
        if !failures.is_empty() {
            snapshot.destroy();
            return Err(DeployError::ResolutionIncomplete(failures));
        }

        let delta = snapshot.delta_modules().to_vec();
        let order = commit_order(&delta, snapshot.wires());
        let mut installed: Vec<(Arc<Module>, ArtifactHandle, ModuleHandle)> = Vec::new();

        for module in order {
            let artifact = self.arena.create(
                ArtifactIdentity::module(module.id.name.clone(), module.id.version.clone()),
                format!("module:{}", module.id),
            );
            let location = self.arena.location(artifact)?;
            match self.runtime.install(&location, &module).await {
                Ok(handle) => {
                    self.arena.transition(artifact, ArtifactState::Installed)?;
                    self.arena.transition(artifact, ArtifactState::Resolving)?;
                    self.arena.transition(artifact, ArtifactState::Resolved)?;
                    self.notifier.emit(
                        DeployEvent::new(
                            DeployEventKind::ModuleInstalled,
                            module.id.name.clone(),
                            module.id.version.clone(),
                        )
                        .for_module(module.id.clone()),
                        EventSource::Coordinator,
                    );
                    installed.push((module, artifact, handle));
                }
                Err(err) => {
                    self.arena
                        .transition(artifact, ArtifactState::InstallFailed)?;
                    warn!(module = %module.id, %err, "install failed; rolling back commit");
                    self.rollback(&installed).await?;
                    // The failure was announced through the state change;
                    // a failed commit retains no artifacts.
                    self.arena.remove(artifact)?;
                    self.notifier.emit(
                        DeployEvent::new(
                            DeployEventKind::RolledBack {
                                reason: err.to_string(),
                            },
                            module.id.name.clone(),
                            module.id.version.clone(),
                        )
                        .for_module(module.id.clone()),
                        EventSource::Coordinator,
                    );
                    return Err(DeployError::CommitFailed {
                        module: module.id.clone(),
                        cause: err.to_string(),
                    });
                }
            }
        }

        let ids: Vec<ModuleId> = installed.iter().map(|(m, _, _)| m.id.clone()).collect();
        for (module, artifact, handle) in installed {
            self.module_artifacts
                .insert(module.id.clone(), (artifact, handle));
        }
        self.live.install_batch(
            snapshot.modules().cloned().collect(),
            snapshot.wires().to_vec(),
        );
        info!(installed = ids.len(), "change set committed");
        Ok(ids)
    }

    /// Uninstall, in reverse order, everything the current commit
    /// installed. A failure here means the live state no longer matches
    /// what the runtime holds.
    async fn rollback(&self, installed: &[(Arc<Module>, ArtifactHandle, ModuleHandle)]) -> Result<()> {
        for (module, artifact, handle) in installed.iter().rev() {
            if let Err(err) = self.runtime.uninstall(handle).await {
                return Err(DeployError::RollbackInconsistent {
                    module: module.id.clone(),
                    cause: err.to_string(),
                });
            }
            self.arena.transition(*artifact, ArtifactState::Uninstalling)?;
            self.arena.transition(*artifact, ArtifactState::Uninstalled)?;
            self.arena.remove(*artifact)?;
            debug!(module = %module.id, "rolled back");
        }
        Ok(())
    }

    /// Deploy an application: install its modules through one atomic
    /// commit, then create its plan artifact with the modules as mandatory
    /// children. On any failure the live graph is untouched.
    #[instrument(skip(self, descriptors), fields(%application, %version))]
    pub async fn deploy(
        &self,
        application: &str,
        version: Version,
        descriptors: Vec<ModuleDescriptor>,
    ) -> Result<ArtifactHandle> {
        self.emit_app(DeployEventKind::Deploying, application, &version);

        match self.deploy_inner(application, version.clone(), descriptors).await {
            Ok(plan) => {
                self.emit_app(DeployEventKind::Deployed, application, &version);
                Ok(plan)
            }
            Err(err) => {
                self.emit_app(
                    DeployEventKind::DeployFailed {
                        reason: err.to_string(),
                    },
                    application,
                    &version,
                );
                Err(err)
            }
        }
    }

    async fn deploy_inner(
        &self,
        application: &str,
        version: Version,
        descriptors: Vec<ModuleDescriptor>,
    ) -> Result<ArtifactHandle> {
        let mut change = self.begin_change();
        let mut ids = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match change.install(descriptor) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    change.discard();
                    return Err(err);
                }
            }
        }

        let failures = change.resolve();
        if !failures.is_empty() {
            change.discard();
            return Err(DeployError::ResolutionIncomplete(failures));
        }

        self.commit(change).await?;

        let plan = self.arena.create(
            ArtifactIdentity::plan(application, version.clone()),
            format!("plan:{application}"),
        );
        self.arena.transition(plan, ArtifactState::Installed)?;
        self.arena.transition(plan, ArtifactState::Resolving)?;
        self.arena.transition(plan, ArtifactState::Resolved)?;
        for id in &ids {
            let artifact = self
                .module_artifacts
                .get(id)
                .map(|entry| entry.value().0)
                .ok_or_else(|| DeployError::ModuleNotFound(id.clone()))?;
            self.arena.add_child(plan, artifact, true)?;
        }

        self.apps.insert(
            application.to_string(),
            AppRecord {
                plan,
                version,
                modules: ids,
            },
        );
        Ok(plan)
    }

    /// Start an application's plan.
    #[instrument(skip(self), fields(%application, ?mode))]
    pub async fn start_application(
        &self,
        application: &str,
        mode: PlanMode,
    ) -> Result<PlanStartReport> {
        let plan = self.app_plan(application)?;
        let report = start_plan(
            &self.arena,
            plan,
            mode,
            self.executor.as_ref(),
            self.child_timeout,
        )
        .await?;
        Ok(report)
    }

    /// Stop an application's plan, leaving modules installed and resolved.
    #[instrument(skip(self), fields(%application))]
    pub async fn stop_application(&self, application: &str) -> Result<()> {
        let plan = self.app_plan(application)?;
        stop_plan(&self.arena, plan, self.executor.as_ref()).await?;
        Ok(())
    }

    /// Undeploy an application: stop its plan if running, uninstall its
    /// modules from the runtime and the live graph, and drop its artifacts.
    #[instrument(skip(self), fields(%application))]
    pub async fn undeploy(&self, application: &str) -> Result<()> {
        let (name, record) = self
            .apps
            .remove(application)
            .ok_or_else(|| DeployError::ApplicationNotFound(application.to_string()))?;
        self.emit_app(DeployEventKind::Undeploying, &name, &record.version);

        if matches!(
            self.arena.state(record.plan)?,
            ArtifactState::Started | ArtifactState::Starting
        ) {
            stop_plan(&self.arena, record.plan, self.executor.as_ref()).await?;
        }

        let module_ids = record.modules.clone();
        for id in module_ids.iter().rev() {
            let Some((_, (artifact, handle))) = self.module_artifacts.remove(id) else {
                continue;
            };
            // A tolerant start can leave the plan start-failed while this
            // child runs; it still gets stopped before uninstall.
            if self.arena.state(artifact)? == ArtifactState::Started {
                let identity = self.arena.identity(artifact)?;
                self.arena.transition(artifact, ArtifactState::Stopping)?;
                match self.executor.stop(&identity).await {
                    Ok(()) => {
                        self.arena.transition(artifact, ArtifactState::Stopped)?;
                    }
                    Err(err) => {
                        let _ = self.arena.transition(artifact, ArtifactState::StopFailed);
                        warn!(module = %id, %err, "failed to stop child during undeploy");
                    }
                }
            }
            // Failed children may sit in a state with no legal edge to
            // Uninstalling; removal still proceeds.
            if let Err(err) = self.arena.transition(artifact, ArtifactState::Uninstalling) {
                debug!(module = %id, %err, "uninstalling from a non-nominal state");
            }
            if let Err(err) = self.runtime.uninstall(&handle).await {
                let _ = self
                    .arena
                    .transition(artifact, ArtifactState::UninstallFailed);
                self.module_artifacts.insert(id.clone(), (artifact, handle));
                self.apps.insert(name, record);
                return Err(err);
            }
            let _ = self.arena.transition(artifact, ArtifactState::Uninstalled);
            self.arena.remove(artifact)?;
            self.live.remove(id);
            self.notifier.emit(
                DeployEvent::new(
                    DeployEventKind::ModuleUninstalled,
                    id.name.clone(),
                    id.version.clone(),
                )
                .for_module(id.clone()),
                EventSource::Coordinator,
            );
        }

        self.arena.remove(record.plan)?;
        self.emit_app(DeployEventKind::Undeployed, &name, &record.version);
        Ok(())
    }

    fn app_plan(&self, application: &str) -> Result<ArtifactHandle> {
        self.apps
            .get(application)
            .map(|record| record.plan)
            .ok_or_else(|| DeployError::ApplicationNotFound(application.to_string()))
    }

    fn emit_app(&self, kind: DeployEventKind, application: &str, version: &Version) {
        self.notifier.emit(
            DeployEvent::new(kind, application, version.clone()),
            EventSource::Coordinator,
        );
    }

    // Queries.

    /// Committed modules, in install order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.live.modules()
    }

    pub fn module(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.live.get(id)
    }

    /// Committed wires.
    pub fn wires(&self) -> Vec<Wire> {
        self.live.wires()
    }

    /// Lifecycle state of a committed module's artifact.
    pub fn module_state(&self, id: &ModuleId) -> Option<ArtifactState> {
        let artifact = self.module_artifacts.get(id).map(|entry| entry.value().0)?;
        self.arena.state(artifact).ok()
    }

    /// Why a module does not resolve, diagnosed against the committed
    /// state plus nothing.
    pub fn failures_for(&self, id: &ModuleId) -> Vec<ResolutionFailure> {
        QuasiFramework::seeded(self.live.modules()).diagnose(id)
    }

    /// Case-insensitive substring search over `name@version`.
    pub fn search(&self, query: &str) -> Vec<ModuleId> {
        let needle = query.to_lowercase();
        self.live
            .modules()
            .into_iter()
            .filter(|m| m.id.to_string().to_lowercase().contains(&needle))
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn register_listener(&self, listener: Arc<dyn DeploymentListener>) -> ListenerHandle {
        self.notifier.register(listener)
    }

    pub fn unregister_listener(&self, handle: ListenerHandle) -> bool {
        self.notifier.unregister(handle)
    }

    /// Subscribe to the broadcast mirror of the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEventEnvelope> {
        self.notifier.subscribe()
    }
}

/// Order the delta provider-before-consumer using the resolved wires,
/// install order breaking ties. A dependency cycle inside the delta falls
/// back to plain install order for the remainder.
fn commit_order(delta: &[Arc<Module>], wires: &[Wire]) -> Vec<Arc<Module>> {
    let delta_ids: HashSet<&ModuleId> = delta.iter().map(|m| &m.id).collect();
    let mut pending: Vec<Arc<Module>> = delta.to_vec();
    pending.sort_by_key(|m| m.install_order);

    let mut ordered = Vec::with_capacity(pending.len());
    let mut placed: HashSet<ModuleId> = HashSet::new();
    while !pending.is_empty() {
        let mut rest = Vec::new();
        let mut progressed = false;
        for module in pending {
            let ready = wires
                .iter()
                .filter(|w| {
                    w.consumer == module.id
                        && w.provider != module.id
                        && delta_ids.contains(&w.provider)
                })
                .all(|w| placed.contains(&w.provider));
            if ready {
                placed.insert(module.id.clone());
                ordered.push(module);
                progressed = true;
            } else {
                rest.push(module);
            }
        }
        if !progressed {
            ordered.extend(rest);
            break;
        }
        pending = rest;
    }
    ordered
}

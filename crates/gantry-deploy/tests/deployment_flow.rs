//! End-to-end deployment flows through the public API.

use gantry_deploy::{
    DeployCoordinator, DeployError, InMemoryModuleRuntime, ModuleRuntime, PlanMode,
};
use gantry_lifecycle::{DeploymentListener, StartOutcome};
use gantry_types::{
    ArtifactState, DeployEventEnvelope, DeployEventKind, ModuleDescriptor, ModuleId, VersionRange,
};
use semver::Version;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn v(major: u64, minor: u64) -> Version {
    Version::new(major, minor, 0)
}

fn range(text: &str) -> VersionRange {
    text.parse().unwrap()
}

fn coordinator() -> (DeployCoordinator, Arc<InMemoryModuleRuntime>) {
    let runtime = Arc::new(InMemoryModuleRuntime::new());
    let coordinator = DeployCoordinator::new(runtime.clone(), runtime.clone())
        .with_child_timeout(Duration::from_millis(200));
    (coordinator, runtime)
}

/// A three-module application deploys, resolves, and starts; every module
/// ends up wired and running.
#[tokio::test]
async fn deploy_resolve_start_three_modules() {
    let (coordinator, runtime) = coordinator();
    let modules = vec![
        ModuleDescriptor::new("store-api", v(1, 0)).exports_package("store.api", v(1, 0)),
        ModuleDescriptor::new("store-impl", v(1, 0))
            .imports_package("store.api", range("[1.0,2.0)"))
            .exports_package("store.impl", v(1, 0)),
        ModuleDescriptor::new("store-web", v(1, 0))
            .imports_package("store.api", range("[1.0,2.0)"))
            .imports_package("store.impl", range("[1.0,2.0)")),
    ];

    coordinator.deploy("store", v(1, 0), modules).await.unwrap();
    assert_eq!(coordinator.modules().len(), 3);
    assert_eq!(coordinator.wires().len(), 3);
    assert_eq!(runtime.installed().len(), 3);

    let report = coordinator
        .start_application("store", PlanMode::Atomic)
        .await
        .unwrap();
    assert!(report.is_success());
    for name in ["store-api", "store-impl", "store-web"] {
        assert_eq!(
            coordinator.module_state(&ModuleId::new(name, v(1, 0))),
            Some(ArtifactState::Started),
            "{name} should be started"
        );
    }
}

/// A change set that does not resolve reports a near-miss diagnosis and
/// commits nothing.
#[tokio::test]
async fn unresolved_change_reports_near_miss() {
    let (coordinator, _runtime) = coordinator();
    let mut change = coordinator.begin_change();
    change
        .install(ModuleDescriptor::new("old-lib", v(1, 0)).exports_package("api", v(1, 0)))
        .unwrap();
    change
        .install(
            ModuleDescriptor::new("new-app", v(1, 0)).imports_package("api", range("[2.0,3.0)")),
        )
        .unwrap();

    let failures = change.resolve();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].module.name, "new-app");
    // The 1.0.0 export is the near miss: right name, wrong version.
    let near = failures[0].best_near_miss().unwrap();
    assert_eq!(near.provider.name, "old-lib");

    let err = coordinator.commit(change).await.unwrap_err();
    assert!(matches!(err, DeployError::ResolutionIncomplete(_)));
    assert!(coordinator.modules().is_empty());
}

/// Scenario: commit of {d, e} where e's install fails leaves neither
/// module anywhere, and a second corrected commit succeeds.
#[tokio::test]
async fn failed_commit_is_all_or_nothing_then_retryable() {
    let (coordinator, runtime) = coordinator();
    runtime.inject_install_failure("e");

    let mut change = coordinator.begin_change();
    change
        .install(ModuleDescriptor::new("d", v(1, 0)).exports_package("d.api", v(1, 0)))
        .unwrap();
    change
        .install(ModuleDescriptor::new("e", v(1, 0)).imports_package("d.api", range("[1.0,2.0)")))
        .unwrap();

    let err = coordinator.commit(change).await.unwrap_err();
    assert!(matches!(err, DeployError::CommitFailed { .. }));
    assert!(runtime.installed().is_empty());
    assert!(coordinator.modules().is_empty());

    // Same change against the unchanged graph, now that installs work.
    let runtime2 = Arc::new(InMemoryModuleRuntime::new());
    let retry_coordinator = DeployCoordinator::new(runtime2.clone(), runtime2.clone());
    let mut retry = retry_coordinator.begin_change();
    retry
        .install(ModuleDescriptor::new("d", v(1, 0)).exports_package("d.api", v(1, 0)))
        .unwrap();
    retry
        .install(ModuleDescriptor::new("e", v(1, 0)).imports_package("d.api", range("[1.0,2.0)")))
        .unwrap();
    assert_eq!(retry_coordinator.commit(retry).await.unwrap().len(), 2);
}

/// Scenario: an atomic plan whose second child fails to start stops the
/// first child again and records the plan as start-failed; modules remain
/// installed and resolvable for a retry.
#[tokio::test]
async fn atomic_plan_start_failure_unwinds() {
    let (coordinator, runtime) = coordinator();
    runtime.inject_start_failure("g");

    coordinator
        .deploy(
            "app",
            v(1, 0),
            vec![
                ModuleDescriptor::new("f", v(1, 0)).exports_package("f.api", v(1, 0)),
                ModuleDescriptor::new("g", v(1, 0))
                    .imports_package("f.api", range("[1.0,2.0)")),
            ],
        )
        .await
        .unwrap();

    let report = coordinator
        .start_application("app", PlanMode::Atomic)
        .await
        .unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].1, StartOutcome::Failed(_)));

    assert_eq!(
        coordinator.module_state(&ModuleId::new("f", v(1, 0))),
        Some(ArtifactState::Stopped)
    );
    assert_eq!(
        coordinator.module_state(&ModuleId::new("g", v(1, 0))),
        Some(ArtifactState::StartFailed)
    );
    // The modules themselves are still committed.
    assert_eq!(coordinator.modules().len(), 2);
}

/// Listeners observe every lifecycle transition in order, and a panicking
/// listener does not disturb the deployment or its peers.
#[tokio::test]
async fn listeners_observe_transitions_despite_a_panicking_peer() {
    struct Recorder(Mutex<Vec<String>>);
    impl DeploymentListener for Recorder {
        fn on_event(&self, event: &DeployEventEnvelope) {
            if let DeployEventKind::StateChanged { artifact, to, .. } = &event.event.kind {
                self.0.lock().unwrap().push(format!("{artifact}:{to}"));
            }
        }
    }
    struct Faulty;
    impl DeploymentListener for Faulty {
        fn on_event(&self, _event: &DeployEventEnvelope) {
            panic!("listener bug");
        }
    }

    let (coordinator, _runtime) = coordinator();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    coordinator.register_listener(Arc::new(Faulty));
    coordinator.register_listener(recorder.clone());

    coordinator
        .deploy(
            "solo",
            v(1, 0),
            vec![ModuleDescriptor::new("solo-mod", v(1, 0))],
        )
        .await
        .unwrap();

    let seen = recorder.0.lock().unwrap().clone();
    let module_transitions: Vec<&String> = seen
        .iter()
        .filter(|s| s.starts_with("module:solo-mod"))
        .collect();
    assert_eq!(
        module_transitions,
        vec![
            "module:solo-mod@1.0.0:installed",
            "module:solo-mod@1.0.0:resolving",
            "module:solo-mod@1.0.0:resolved",
        ]
    );
}

/// Undeploying one of two applications leaves the other's modules and
/// wiring intact.
#[tokio::test]
async fn undeploy_is_scoped_to_one_application() {
    let (coordinator, runtime) = coordinator();
    coordinator
        .deploy(
            "alpha",
            v(1, 0),
            vec![ModuleDescriptor::new("alpha-core", v(1, 0))],
        )
        .await
        .unwrap();
    coordinator
        .deploy(
            "beta",
            v(1, 0),
            vec![ModuleDescriptor::new("beta-core", v(1, 0))],
        )
        .await
        .unwrap();

    coordinator.undeploy("alpha").await.unwrap();
    assert!(coordinator
        .module(&ModuleId::new("alpha-core", v(1, 0)))
        .is_none());
    assert!(coordinator
        .module(&ModuleId::new("beta-core", v(1, 0)))
        .is_some());
    assert_eq!(runtime.installed(), vec![ModuleId::new("beta-core", v(1, 0))]);
}

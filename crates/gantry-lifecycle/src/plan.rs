//! Composite plan orchestration.
//!
//! A plan is an artifact whose children are the deployable units of one
//! application. Starting a plan starts its children in edge order, waiting
//! on each child's start signal with a bounded timeout; stopping walks the
//! children in reverse. A child shared with another plan is left running
//! as long as any other parent still needs it.

use crate::arena::{ArtifactArena, ArtifactHandle};
use crate::error::{LifecycleError, Result};
use crate::signal::{SignalWait, StartOutcome, StartSignal};
use async_trait::async_trait;
use gantry_types::{ArtifactIdentity, ArtifactState};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Performs the actual start and stop work for one artifact.
///
/// `start` receives the completion signal and must eventually drive it
/// (directly, or from a task it spawns). Returning `Err` without driving
/// the signal is also a valid failure path.
#[async_trait]
pub trait StartExecutor: Send + Sync {
    async fn start(&self, identity: &ArtifactIdentity, signal: StartSignal) -> Result<()>;
    async fn stop(&self, identity: &ArtifactIdentity) -> Result<()>;
}

/// How a plan reacts to a mandatory child failing to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Stop every child started by this call and fail the plan.
    Atomic,
    /// Record the failure and keep starting the remaining children.
    Tolerant,
}

/// What a [`start_plan`] call did.
#[derive(Debug)]
pub struct PlanStartReport {
    /// Children started by this call, in start order.
    pub started: Vec<ArtifactHandle>,
    /// Children that did not reach `Started`, with the recorded outcome.
    pub failures: Vec<(ArtifactHandle, StartOutcome)>,
    /// The plan's state after the call.
    pub plan_state: ArtifactState,
}

impl PlanStartReport {
    pub fn is_success(&self) -> bool {
        self.plan_state == ArtifactState::Started
    }
}

/// Start `plan` by starting its children in edge order.
///
/// Children already `Started` (shared with another running plan) are
/// skipped. Each start is bounded by `child_timeout`; on timeout the
/// child's signal is aborted and the child lands in `StartAborted`.
#[instrument(skip(arena, executor), fields(%plan, ?mode))]
pub async fn start_plan(
    arena: &ArtifactArena,
    plan: ArtifactHandle,
    mode: PlanMode,
    executor: &dyn StartExecutor,
    child_timeout: Duration,
) -> Result<PlanStartReport> {
    arena.transition(plan, ArtifactState::Starting)?;

    let mut started = Vec::new();
    let mut failures: Vec<(ArtifactHandle, StartOutcome)> = Vec::new();

    for edge in arena.children(plan)? {
        let child = edge.child;
        if arena.state(child)? == ArtifactState::Started {
            // Shared with another plan and already running.
            continue;
        }

        let outcome = start_child(arena, child, executor, child_timeout).await?;
        match outcome {
            StartOutcome::Completed => started.push(child),
            other => {
                warn!(%child, outcome = ?other, mandatory = edge.mandatory, "child failed to start");
                failures.push((child, other));
                if edge.mandatory && mode == PlanMode::Atomic {
                    unwind_started(arena, plan, &started, executor).await;
                    arena.transition(plan, ArtifactState::StartFailed)?;
                    return Ok(PlanStartReport {
                        started,
                        failures,
                        plan_state: ArtifactState::StartFailed,
                    });
                }
            }
        }
    }

    let mandatory_failed = {
        let children = arena.children(plan)?;
        failures.iter().any(|(handle, _)| {
            children
                .iter()
                .any(|edge| edge.child == *handle && edge.mandatory)
        })
    };
    let plan_state = if mandatory_failed {
        arena.transition(plan, ArtifactState::StartFailed)?;
        ArtifactState::StartFailed
    } else {
        arena.transition(plan, ArtifactState::Started)?;
        ArtifactState::Started
    };

    info!(%plan, %plan_state, started = started.len(), failed = failures.len(), "plan start finished");
    Ok(PlanStartReport {
        started,
        failures,
        plan_state,
    })
}

/// Start one child and wait for its signal. Always leaves the child in a
/// settled state (`Started`, `StartFailed`, or `StartAborted`).
async fn start_child(
    arena: &ArtifactArena,
    child: ArtifactHandle,
    executor: &dyn StartExecutor,
    timeout: Duration,
) -> Result<StartOutcome> {
    let identity = arena.identity(child)?;
    let signal = arena.begin_start(child).await?;

    if let Err(err) = executor.start(&identity, signal.clone()).await {
        let outcome = StartOutcome::Failed(err.to_string());
        arena.finish_start(child, outcome.clone())?;
        return Ok(outcome);
    }

    match signal.wait(timeout).await {
        SignalWait::Complete(outcome) => {
            arena.finish_start(child, outcome.clone())?;
            Ok(outcome)
        }
        SignalWait::NotYetComplete => {
            // Timed out: abandon the start rather than leave it in flight.
            signal.abort();
            arena.finish_start(child, StartOutcome::Aborted)?;
            Ok(StartOutcome::Aborted)
        }
    }
}

/// Stop, in reverse order, the children this call started. A child still
/// needed by another started plan is left running.
async fn unwind_started(
    arena: &ArtifactArena,
    plan: ArtifactHandle,
    started: &[ArtifactHandle],
    executor: &dyn StartExecutor,
) {
    for &child in started.iter().rev() {
        match needed_elsewhere(arena, child, plan) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(_) => continue,
        }
        if let Err(err) = stop_child(arena, child, executor).await {
            warn!(%child, %err, "unwind: failed to stop child");
        }
    }
}

/// Stop `plan` by stopping its children in reverse edge order.
///
/// A child shared with another plan that is still `Started` or `Starting`
/// is left running. Children that fail to stop land in `StopFailed`; the
/// plan itself still reaches `Stopped`.
#[instrument(skip(arena, executor), fields(%plan))]
pub async fn stop_plan(
    arena: &ArtifactArena,
    plan: ArtifactHandle,
    executor: &dyn StartExecutor,
) -> Result<()> {
    arena.transition(plan, ArtifactState::Stopping)?;

    let mut children = arena.children(plan)?;
    children.reverse();
    for edge in children {
        let child = edge.child;
        if arena.state(child)? != ArtifactState::Started {
            continue;
        }
        if needed_elsewhere(arena, child, plan)? {
            continue;
        }
        if let Err(err) = stop_child(arena, child, executor).await {
            warn!(%child, %err, "failed to stop child");
        }
    }

    arena.transition(plan, ArtifactState::Stopped)?;
    info!(%plan, "plan stopped");
    Ok(())
}

/// Whether another parent of `child` is itself running or starting.
fn needed_elsewhere(
    arena: &ArtifactArena,
    child: ArtifactHandle,
    plan: ArtifactHandle,
) -> Result<bool> {
    for parent in arena.parents(child)? {
        if parent == plan {
            continue;
        }
        if matches!(
            arena.state(parent)?,
            ArtifactState::Started | ArtifactState::Starting
        ) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn stop_child(
    arena: &ArtifactArena,
    child: ArtifactHandle,
    executor: &dyn StartExecutor,
) -> Result<()> {
    let identity = arena.identity(child)?;
    let _guard = arena.lock_operation(child).await?;
    arena.transition(child, ArtifactState::Stopping)?;
    match executor.stop(&identity).await {
        Ok(()) => {
            arena.transition(child, ArtifactState::Stopped)?;
            Ok(())
        }
        Err(err) => {
            arena.transition(child, ArtifactState::StopFailed)?;
            Err(LifecycleError::Executor(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use semver::Version;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Test executor: completes every start except for names it is told to
    /// fail or stall on, and records stop calls.
    struct ScriptedExecutor {
        fail: HashSet<String>,
        stall: HashSet<String>,
        stops: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                fail: HashSet::new(),
                stall: HashSet::new(),
                stops: Mutex::new(Vec::new()),
            }
        }

        fn failing(names: &[&str]) -> Self {
            let mut executor = Self::new();
            executor.fail = names.iter().map(|n| n.to_string()).collect();
            executor
        }

        fn stalling(names: &[&str]) -> Self {
            let mut executor = Self::new();
            executor.stall = names.iter().map(|n| n.to_string()).collect();
            executor
        }

        fn stopped(&self) -> Vec<String> {
            self.stops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StartExecutor for ScriptedExecutor {
        async fn start(&self, identity: &ArtifactIdentity, signal: StartSignal) -> Result<()> {
            if self.stall.contains(&identity.name) {
                // Never drive the signal; the caller's timeout fires.
                return Ok(());
            }
            if self.fail.contains(&identity.name) {
                signal.fail(format!("{} refused to start", identity.name));
            } else {
                signal.complete();
            }
            Ok(())
        }

        async fn stop(&self, identity: &ArtifactIdentity) -> Result<()> {
            self.stops.lock().unwrap().push(identity.name.clone());
            Ok(())
        }
    }

    fn arena() -> ArtifactArena {
        ArtifactArena::new(Arc::new(Notifier::new()))
    }

    fn resolved_module(arena: &ArtifactArena, name: &str) -> ArtifactHandle {
        let handle = arena.create(
            ArtifactIdentity::module(name, Version::new(1, 0, 0)),
            format!("mem:{name}"),
        );
        arena.transition(handle, ArtifactState::Installed).unwrap();
        arena.transition(handle, ArtifactState::Resolving).unwrap();
        arena.transition(handle, ArtifactState::Resolved).unwrap();
        handle
    }

    fn resolved_plan(arena: &ArtifactArena, name: &str, children: &[ArtifactHandle]) -> ArtifactHandle {
        let plan = arena.create(
            ArtifactIdentity::plan(name, Version::new(1, 0, 0)),
            format!("plan:{name}"),
        );
        arena.transition(plan, ArtifactState::Installed).unwrap();
        arena.transition(plan, ArtifactState::Resolving).unwrap();
        arena.transition(plan, ArtifactState::Resolved).unwrap();
        for &child in children {
            arena.add_child(plan, child, true).unwrap();
        }
        plan
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_start_plan_starts_children_in_order() {
        let arena = arena();
        let a = resolved_module(&arena, "a");
        let b = resolved_module(&arena, "b");
        let plan = resolved_plan(&arena, "app", &[a, b]);
        let executor = ScriptedExecutor::new();

        let report = start_plan(&arena, plan, PlanMode::Atomic, &executor, TIMEOUT)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.started, vec![a, b]);
        assert_eq!(arena.state(a).unwrap(), ArtifactState::Started);
        assert_eq!(arena.state(b).unwrap(), ArtifactState::Started);
        assert_eq!(arena.state(plan).unwrap(), ArtifactState::Started);
    }

    #[tokio::test]
    async fn test_atomic_failure_unwinds_started_children() {
        // Plan {f, g}: f starts, g fails. The plan must stop f and land in
        // StartFailed, with g in StartFailed.
        let arena = arena();
        let f = resolved_module(&arena, "f");
        let g = resolved_module(&arena, "g");
        let plan = resolved_plan(&arena, "app", &[f, g]);
        let executor = ScriptedExecutor::failing(&["g"]);

        let report = start_plan(&arena, plan, PlanMode::Atomic, &executor, TIMEOUT)
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.plan_state, ArtifactState::StartFailed);
        assert_eq!(arena.state(plan).unwrap(), ArtifactState::StartFailed);
        assert_eq!(arena.state(g).unwrap(), ArtifactState::StartFailed);
        assert_eq!(arena.state(f).unwrap(), ArtifactState::Stopped);
        assert_eq!(executor.stopped(), vec!["f".to_string()]);
    }

    #[tokio::test]
    async fn test_tolerant_mode_continues_past_failure() {
        let arena = arena();
        let a = resolved_module(&arena, "a");
        let b = resolved_module(&arena, "b");
        let c = resolved_module(&arena, "c");
        let plan = resolved_plan(&arena, "app", &[a, b, c]);
        let executor = ScriptedExecutor::failing(&["b"]);

        let report = start_plan(&arena, plan, PlanMode::Tolerant, &executor, TIMEOUT)
            .await
            .unwrap();

        // b's failure is recorded but a and c still started; the plan
        // itself reflects the mandatory failure.
        assert_eq!(report.started, vec![a, c]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.plan_state, ArtifactState::StartFailed);
        assert_eq!(arena.state(a).unwrap(), ArtifactState::Started);
        assert_eq!(arena.state(c).unwrap(), ArtifactState::Started);
        assert!(executor.stopped().is_empty());
    }

    #[tokio::test]
    async fn test_optional_child_failure_does_not_fail_plan() {
        let arena = arena();
        let core = resolved_module(&arena, "core");
        let extra = resolved_module(&arena, "extra");
        let plan = arena.create(
            ArtifactIdentity::plan("app", Version::new(1, 0, 0)),
            "plan:app",
        );
        arena.transition(plan, ArtifactState::Installed).unwrap();
        arena.transition(plan, ArtifactState::Resolving).unwrap();
        arena.transition(plan, ArtifactState::Resolved).unwrap();
        arena.add_child(plan, core, true).unwrap();
        arena.add_child(plan, extra, false).unwrap();
        let executor = ScriptedExecutor::failing(&["extra"]);

        let report = start_plan(&arena, plan, PlanMode::Atomic, &executor, TIMEOUT)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(arena.state(core).unwrap(), ArtifactState::Started);
        assert_eq!(arena.state(extra).unwrap(), ArtifactState::StartFailed);
    }

    #[tokio::test]
    async fn test_stalled_child_is_aborted_on_timeout() {
        let arena = arena();
        let slow = resolved_module(&arena, "slow");
        let plan = resolved_plan(&arena, "app", &[slow]);
        let executor = ScriptedExecutor::stalling(&["slow"]);

        let report = start_plan(
            &arena,
            plan,
            PlanMode::Atomic,
            &executor,
            Duration::from_millis(20),
        )
        .await
        .unwrap();

        assert_eq!(report.plan_state, ArtifactState::StartFailed);
        assert_eq!(arena.state(slow).unwrap(), ArtifactState::StartAborted);
        assert_eq!(report.failures, vec![(slow, StartOutcome::Aborted)]);
    }

    #[tokio::test]
    async fn test_shared_child_survives_sibling_plan_stop() {
        let arena = arena();
        let shared = resolved_module(&arena, "shared");
        let own_a = resolved_module(&arena, "own-a");
        let own_b = resolved_module(&arena, "own-b");
        let plan_a = resolved_plan(&arena, "app-a", &[shared, own_a]);
        let plan_b = resolved_plan(&arena, "app-b", &[shared, own_b]);
        let executor = ScriptedExecutor::new();

        let report_a = start_plan(&arena, plan_a, PlanMode::Atomic, &executor, TIMEOUT)
            .await
            .unwrap();
        assert!(report_a.is_success());

        // Second plan skips the already-started shared child.
        let report_b = start_plan(&arena, plan_b, PlanMode::Atomic, &executor, TIMEOUT)
            .await
            .unwrap();
        assert!(report_b.is_success());
        assert_eq!(report_b.started, vec![own_b]);

        // Stopping plan A leaves the shared child running for plan B.
        stop_plan(&arena, plan_a, &executor).await.unwrap();
        assert_eq!(arena.state(shared).unwrap(), ArtifactState::Started);
        assert_eq!(arena.state(own_a).unwrap(), ArtifactState::Stopped);

        // Stopping plan B, the last user, finally stops it.
        stop_plan(&arena, plan_b, &executor).await.unwrap();
        assert_eq!(arena.state(shared).unwrap(), ArtifactState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_plan_reverses_order() {
        let arena = arena();
        let a = resolved_module(&arena, "a");
        let b = resolved_module(&arena, "b");
        let plan = resolved_plan(&arena, "app", &[a, b]);
        let executor = ScriptedExecutor::new();

        start_plan(&arena, plan, PlanMode::Atomic, &executor, TIMEOUT)
            .await
            .unwrap();
        stop_plan(&arena, plan, &executor).await.unwrap();

        assert_eq!(executor.stopped(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(arena.state(plan).unwrap(), ArtifactState::Stopped);
    }
}

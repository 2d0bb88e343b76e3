//! Scenario lifecycle
//!
//! Every scenario runs the same way: Setup, then RunTests, then TearDown.
//! TearDown runs on every exit path (a failed setup, a failed assertion, a
//! panic, a cancellation) and its own errors are collected as warnings, so
//! they never replace the scenario's outcome.
//!
//! ```text
//! Created -> Setup -> Running -> TearingDown -> Done
//!              |         |            ^
//!              +---------+------------+   (on failure)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use meshline::lifecycle::Lifecycle;
//! use meshline::topology::Planner;
//!
//! let report = Lifecycle::default()
//!     .execute(&Planner::from_env()?, &TcpEcho::new(link))
//!     .await?;
//! report.into_result()?;
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::HarnessConfig;
use crate::context::{ClusterContext, ContextError, Role};
use crate::link::LinkError;
use crate::topology::{ClusterNeeds, Plan, Planner, SkipReason, Topology, TopologyError};

/// Where a scenario run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Setup,
    Running,
    TearingDown,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Setup => "setup",
            Phase::Running => "running",
            Phase::TearingDown => "teardown",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Error type for scenario setup and test steps
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("cancelled during {phase}")]
    Cancelled { phase: Phase },

    #[error("panicked during {phase}: {message}")]
    Panicked { phase: Phase, message: String },
}

impl ScenarioError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::SetupFailed(message.into())
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed(message.into())
    }

    /// A wait ran out of time
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Context(e) if e.is_timeout())
    }

    /// Something reached a terminal state other than success
    #[must_use]
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Self::AssertionFailed(_) | Self::Context(ContextError::JobFailed { .. })
        )
    }
}

/// One cleanup step that did not go as planned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownWarning {
    /// Slot label (`public-1`) or `scenario` for scenario-wide failures
    pub target: String,
    pub message: String,
}

impl TeardownWarning {
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

/// A Setup/RunTests/TearDown implementation
///
/// `tear_down` defaults to deleting every context's namespace.
#[async_trait]
pub trait ClusterScenario: Send + Sync {
    fn name(&self) -> &str;

    /// Clusters this scenario needs
    fn needs(&self) -> ClusterNeeds;

    /// Provision namespaces, workloads and links; any error stops the run
    async fn setup(&self, topology: &Topology) -> Result<(), ScenarioError>;

    /// Exercise the system under test
    async fn run_tests(&self, topology: &Topology) -> Result<(), ScenarioError>;

    /// Best-effort cleanup, each cluster step bounded by `timeout`
    async fn tear_down(&self, topology: &Topology, timeout: Duration) -> Vec<TeardownWarning> {
        teardown_namespaces(topology, timeout).await
    }
}

/// How a scenario run ended
#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped(SkipReason),
    Failed { phase: Phase, error: ScenarioError },
}

/// Everything known about one scenario run
#[derive(Debug)]
pub struct RunReport {
    pub scenario: String,
    pub outcome: Outcome,
    /// Phases entered, in order
    pub phases: Vec<Phase>,
    pub teardown_warnings: Vec<TeardownWarning>,
    pub elapsed: Duration,
}

impl RunReport {
    fn skipped(scenario: &str, reason: SkipReason) -> Self {
        Self {
            scenario: scenario.to_string(),
            outcome: Outcome::Skipped(reason),
            phases: vec![Phase::Created, Phase::Done],
            teardown_warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed)
    }

    #[must_use]
    pub fn skipped_reason(&self) -> Option<&SkipReason> {
        match &self.outcome {
            Outcome::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    /// The failure, if any; a skip is not a failure
    #[must_use]
    pub fn error(&self) -> Option<&ScenarioError> {
        match &self.outcome {
            Outcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// `Ok` for passed and skipped runs, the scenario error otherwise
    pub fn into_result(self) -> Result<(), ScenarioError> {
        match self.outcome {
            Outcome::Passed | Outcome::Skipped(_) => Ok(()),
            Outcome::Failed { error, .. } => Err(error),
        }
    }
}

/// Runs scenarios with guaranteed teardown
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    config: HarnessConfig,
    cancel: CancellationToken,
}

impl Lifecycle {
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort Setup/RunTests when `token` is cancelled; teardown still runs
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this lifecycle
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the scenario's topology and run it, or report the skip
    #[instrument(skip_all, fields(scenario = %scenario.name()))]
    pub async fn execute<S>(&self, planner: &Planner, scenario: &S) -> Result<RunReport, TopologyError>
    where
        S: ClusterScenario + ?Sized,
    {
        match planner.build(&scenario.needs()).await? {
            Plan::Skip(reason) => {
                info!(%reason, "Scenario skipped");
                Ok(RunReport::skipped(scenario.name(), reason))
            }
            Plan::Ready(topology) => {
                let topology = topology.with_cancel(&self.cancel);
                Ok(self.run(scenario, &topology).await)
            }
        }
    }

    /// Run Setup and RunTests on `topology`, then always TearDown
    #[instrument(skip_all, fields(scenario = %scenario.name(), contexts = topology.len()))]
    pub async fn run<S>(&self, scenario: &S, topology: &Topology) -> RunReport
    where
        S: ClusterScenario + ?Sized,
    {
        let start = Instant::now();
        let mut phases = vec![Phase::Created];

        phases.push(Phase::Setup);
        info!("Setting up");
        let mut result = self
            .guarded(Phase::Setup, scenario.setup(topology))
            .await
            .map_err(|e| (Phase::Setup, e));

        if result.is_ok() {
            phases.push(Phase::Running);
            info!("Running tests");
            result = self
                .guarded(Phase::Running, scenario.run_tests(topology))
                .await
                .map_err(|e| (Phase::Running, e));
        }

        phases.push(Phase::TearingDown);
        let teardown_warnings = if self.config.keep_namespaces {
            info!(namespaces = ?topology.namespaces(), "Keeping namespaces (keep_namespaces is set)");
            Vec::new()
        } else {
            self.tear_down(scenario, topology).await
        };
        phases.push(Phase::Done);

        let outcome = match result {
            Ok(()) => {
                info!("Scenario passed");
                Outcome::Passed
            }
            Err((phase, error)) => {
                error!(%phase, %error, "Scenario failed");
                Outcome::Failed { phase, error }
            }
        };

        RunReport {
            scenario: scenario.name().to_string(),
            outcome,
            phases,
            teardown_warnings,
            elapsed: start.elapsed(),
        }
    }

    /// Await `body`, turning panics and cancellation into errors
    async fn guarded<F>(&self, phase: Phase, body: F) -> Result<(), ScenarioError>
    where
        F: std::future::Future<Output = Result<(), ScenarioError>>,
    {
        let body = AssertUnwindSafe(body).catch_unwind();

        tokio::select! {
            biased;

            () = self.cancel.cancelled() => {
                warn!(%phase, "Cancelled");
                Err(ScenarioError::Cancelled { phase })
            }
            result = body => match result {
                Ok(result) => result,
                Err(panic) => Err(ScenarioError::Panicked {
                    phase,
                    message: panic_message(panic.as_ref()),
                }),
            },
        }
    }

    async fn tear_down<S>(&self, scenario: &S, topology: &Topology) -> Vec<TeardownWarning>
    where
        S: ClusterScenario + ?Sized,
    {
        info!("Tearing down");
        let step_timeout = self.config.teardown_timeout;
        let teardown = AssertUnwindSafe(scenario.tear_down(topology, step_timeout)).catch_unwind();

        // Steps run concurrently; the overall bound only catches a scenario
        // that ignores its step timeout.
        let warnings = match tokio::time::timeout(step_timeout * 2, teardown).await {
            Ok(Ok(warnings)) => warnings,
            Ok(Err(panic)) => vec![TeardownWarning::new(
                "scenario",
                format!("teardown panicked: {}", panic_message(panic.as_ref())),
            )],
            Err(_) => vec![TeardownWarning::new(
                "scenario",
                format!("teardown did not finish within {:?}", step_timeout * 2),
            )],
        };

        for warning in &warnings {
            warn!(slot = %warning.target, message = %warning.message, "Teardown warning");
        }
        warnings
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

async fn delete_bounded(ctx: &ClusterContext, timeout: Duration) -> Option<TeardownWarning> {
    if !ctx.created_namespace() {
        debug!(slot = %ctx.slot(), namespace = %ctx.namespace, "Namespace not created by this run, leaving it");
        return None;
    }
    match tokio::time::timeout(timeout, ctx.delete_namespace()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(TeardownWarning::new(ctx.slot(), e.to_string())),
        Err(_) => Some(TeardownWarning::new(
            ctx.slot(),
            format!("deleting namespace {} timed out after {timeout:?}", ctx.namespace),
        )),
    }
}

/// Delete every namespace this run created, concurrently
///
/// Never short-circuits: every such namespace gets a deletion attempt and
/// every failure becomes a warning. Namespaces that already existed (setup
/// refused them) are left in place.
pub async fn teardown_namespaces(topology: &Topology, timeout: Duration) -> Vec<TeardownWarning> {
    join_all(topology.iter().map(|ctx| delete_bounded(ctx, timeout)))
        .await
        .into_iter()
        .flatten()
        .collect()
}

/// Delete the namespaces of the given `(role, index)` slots
///
/// A slot that cannot be resolved is a warning; the others are still
/// deleted.
pub async fn teardown_slots(
    topology: &Topology,
    slots: &[(Role, usize)],
    timeout: Duration,
) -> Vec<TeardownWarning> {
    let deletions = slots.iter().map(|&(role, index)| async move {
        match topology.get(role, index) {
            Ok(ctx) => delete_bounded(ctx, timeout).await,
            Err(e) => Some(TeardownWarning::new(format!("{role}-{index}"), e.to_string())),
        }
    });

    join_all(deletions).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterApi;
    use crate::credentials::Credential;
    use crate::testing::FakeCluster;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn topology(cluster: &Arc<FakeCluster>) -> Topology {
        let ctx = |role, index| {
            ClusterContext::new(role, index, "lc", Credential::new("/k"), cluster.clone())
        };
        Topology::from_contexts(vec![ctx(Role::Public, 1), ctx(Role::Private, 1)]).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        fail_setup: bool,
        fail_tests: bool,
        panic_in_tests: bool,
        hang_in_tests: bool,
        setups: AtomicUsize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ClusterScenario for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn needs(&self) -> ClusterNeeds {
            ClusterNeeds::new("lc").public(1).private(1)
        }

        async fn setup(&self, topology: &Topology) -> Result<(), ScenarioError> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            for ctx in topology {
                ctx.create_namespace().await?;
            }
            if self.fail_setup {
                return Err(ScenarioError::setup("router did not start"));
            }
            Ok(())
        }

        async fn run_tests(&self, _topology: &Topology) -> Result<(), ScenarioError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panic_in_tests {
                panic!("boom");
            }
            if self.hang_in_tests {
                std::future::pending::<()>().await;
            }
            if self.fail_tests {
                return Err(ScenarioError::assertion("echo mismatch"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_passing_run_visits_every_phase() {
        let cluster = Arc::new(FakeCluster::new());
        let scenario = Recorder::default();

        let report = Lifecycle::default().run(&scenario, &topology(&cluster)).await;

        assert!(report.passed());
        assert_eq!(
            report.phases,
            vec![
                Phase::Created,
                Phase::Setup,
                Phase::Running,
                Phase::TearingDown,
                Phase::Done
            ]
        );
        assert!(cluster.namespaces().is_empty());
        assert!(report.teardown_warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failed_setup_skips_tests_but_tears_down() {
        let cluster = Arc::new(FakeCluster::new());
        let scenario = Recorder {
            fail_setup: true,
            ..Default::default()
        };

        let report = Lifecycle::default().run(&scenario, &topology(&cluster)).await;

        assert_eq!(scenario.runs.load(Ordering::SeqCst), 0);
        assert!(!report.phases.contains(&Phase::Running));
        assert!(matches!(
            report.outcome,
            Outcome::Failed {
                phase: Phase::Setup,
                error: ScenarioError::SetupFailed(_)
            }
        ));
        assert_eq!(
            cluster.deleted_namespaces(),
            vec!["public-lc-1".to_string(), "private-lc-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_and_teardown_runs() {
        let cluster = Arc::new(FakeCluster::new());
        let scenario = Recorder {
            panic_in_tests: true,
            ..Default::default()
        };

        let report = Lifecycle::default().run(&scenario, &topology(&cluster)).await;

        match report.outcome {
            Outcome::Failed {
                phase: Phase::Running,
                error: ScenarioError::Panicked { message, .. },
            } => assert_eq!(message, "boom"),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert!(cluster.namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_warnings_do_not_replace_outcome() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_namespace_deletes();
        let scenario = Recorder {
            fail_tests: true,
            ..Default::default()
        };

        let report = Lifecycle::default().run(&scenario, &topology(&cluster)).await;

        assert_eq!(report.teardown_warnings.len(), 2);
        let error = report.error().unwrap();
        assert!(error.is_assertion());
        assert!(!error.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_body_and_still_tears_down() {
        let cluster = Arc::new(FakeCluster::new());
        let scenario = Recorder {
            hang_in_tests: true,
            ..Default::default()
        };
        let lifecycle = Lifecycle::default();
        let token = lifecycle.cancel_token();
        let topology = topology(&cluster);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });

        let report = lifecycle.run(&scenario, &topology).await;

        assert!(matches!(
            report.outcome,
            Outcome::Failed {
                phase: Phase::Running,
                error: ScenarioError::Cancelled { .. }
            }
        ));
        assert!(cluster.namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_keep_namespaces_skips_deletion() {
        let cluster = Arc::new(FakeCluster::new());
        let lifecycle = Lifecycle::new(HarnessConfig::default().keep_namespaces(true));

        let report = lifecycle.run(&Recorder::default(), &topology(&cluster)).await;

        assert!(report.passed());
        assert_eq!(cluster.namespaces().len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_slots_continues_past_unresolvable_slot() {
        let cluster = Arc::new(FakeCluster::new());
        let topology = topology(&cluster);
        for ctx in &topology {
            ctx.create_namespace().await.unwrap();
        }

        let warnings = teardown_slots(
            &topology,
            &[(Role::Public, 1), (Role::Public, 2), (Role::Private, 1)],
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].target, "public-2");
        assert!(cluster.namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_leaves_preexisting_namespace() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.create_namespace("private-lc-1").await.unwrap();

        let report = Lifecycle::default()
            .run(&Recorder::default(), &topology(&cluster))
            .await;

        assert!(matches!(
            report.outcome,
            Outcome::Failed {
                phase: Phase::Setup,
                ..
            }
        ));
        assert_eq!(cluster.deleted_namespaces(), vec!["public-lc-1".to_string()]);
        assert!(cluster.has_namespace("private-lc-1"));
        assert!(report.teardown_warnings.is_empty());
    }

    struct StuckTeardown;

    #[async_trait]
    impl ClusterScenario for StuckTeardown {
        fn name(&self) -> &str {
            "stuck-teardown"
        }

        fn needs(&self) -> ClusterNeeds {
            ClusterNeeds::new("lc").public(1)
        }

        async fn setup(&self, _topology: &Topology) -> Result<(), ScenarioError> {
            Ok(())
        }

        async fn run_tests(&self, _topology: &Topology) -> Result<(), ScenarioError> {
            Ok(())
        }

        async fn tear_down(&self, _topology: &Topology, timeout: Duration) -> Vec<TeardownWarning> {
            assert_eq!(timeout, Duration::from_secs(5), "each step gets the configured bound");
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_phase_is_bounded_by_twice_the_step_timeout() {
        let cluster = Arc::new(FakeCluster::new());
        let lifecycle =
            Lifecycle::new(HarnessConfig::default().teardown_timeout(Duration::from_secs(5)));

        let start = tokio::time::Instant::now();
        let report = lifecycle.run(&StuckTeardown, &topology(&cluster)).await;

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(report.passed());
        assert_eq!(report.teardown_warnings.len(), 1);
        assert_eq!(report.teardown_warnings[0].target, "scenario");
        assert!(report.teardown_warnings[0].message.contains("10s"));
    }

    #[tokio::test]
    async fn test_teardown_tolerates_missing_namespaces() {
        let cluster = Arc::new(FakeCluster::new());
        let warnings = teardown_namespaces(&topology(&cluster), Duration::from_secs(5)).await;
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42u32), "panic with non-string payload");
    }
}

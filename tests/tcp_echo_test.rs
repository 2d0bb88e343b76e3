//! TCP echo scenario end to end against fake clusters

use std::sync::Arc;
use std::time::Duration;

use meshline::lifecycle::{ClusterScenario, Outcome, Phase};
use meshline::link::SecretTokenLink;
use meshline::scenarios::tcp_echo::{TcpEcho, ECHO_NAME, TEST_JOB};
use meshline::testing::{FakeCluster, FakeProvider, JobScript};
use meshline::{ContextError, CredentialSet, HarnessConfig, Lifecycle, Planner, ScenarioError};

struct Env {
    public: Arc<FakeCluster>,
    private: Arc<FakeCluster>,
    planner: Planner,
}

fn two_clusters() -> Env {
    let public = Arc::new(FakeCluster::new());
    let private = Arc::new(FakeCluster::new());
    let provider = FakeProvider::new()
        .with_cluster("/kube/public", public.clone())
        .with_cluster("/kube/private", private.clone());
    let planner = Planner::new(
        CredentialSet::new()
            .public("/kube/public")
            .private("/kube/private"),
    )
    .with_provider(provider)
    .with_config(HarnessConfig::default().poll_interval(Duration::from_millis(500)));

    Env {
        public,
        private,
        planner,
    }
}

fn scenario() -> TcpEcho {
    TcpEcho::new(SecretTokenLink::new())
        .namespace_id("echo")
        .timeout(Duration::from_secs(30))
}

#[tokio::test(start_paused = true)]
async fn test_echo_passes_and_cleans_up() {
    let env = two_clusters();
    env.public.script_job(TEST_JOB, JobScript::succeed_after(3));
    env.private.script_job(TEST_JOB, JobScript::succeed_after(2));

    let report = Lifecycle::default()
        .execute(&env.planner, &scenario())
        .await
        .unwrap();

    assert!(report.passed(), "outcome: {:?}", report.outcome);
    assert_eq!(report.phases.last(), Some(&Phase::Done));
    assert!(report.teardown_warnings.is_empty());

    // Both namespaces existed and are gone again
    assert_eq!(env.public.deleted_namespaces(), vec!["public-echo-1"]);
    assert_eq!(env.private.deleted_namespaces(), vec!["private-echo-1"]);
    assert!(env.public.namespaces().is_empty());
    assert!(env.private.namespaces().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_setup_provisions_both_sides() {
    let env = two_clusters();
    let scenario = scenario();

    let topology = match env.planner.build(&scenario.needs()).await.unwrap() {
        meshline::Plan::Ready(topology) => topology,
        meshline::Plan::Skip(reason) => panic!("unexpected skip: {reason}"),
    };
    scenario.setup(&topology).await.unwrap();

    assert!(env.public.has_namespace("public-echo-1"));
    assert!(env.private.has_namespace("private-echo-1"));
    assert_eq!(env.public.service_names("public-echo-1"), vec![ECHO_NAME]);
    assert_eq!(env.private.service_names("private-echo-1"), vec![ECHO_NAME]);

    scenario.run_tests(&topology).await.unwrap();
    assert_eq!(env.public.job_names("public-echo-1"), vec![TEST_JOB]);
    assert_eq!(env.private.job_names("private-echo-1"), vec![TEST_JOB]);

    let warnings = scenario.tear_down(&topology, Duration::from_secs(5)).await;
    assert!(warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_is_assertion_and_teardown_still_runs() {
    let env = two_clusters();
    env.private
        .script_job(TEST_JOB, JobScript::fail_after(2, "BackoffLimitExceeded"));

    let report = Lifecycle::default()
        .execute(&env.planner, &scenario())
        .await
        .unwrap();

    match &report.outcome {
        Outcome::Failed { phase, error } => {
            assert_eq!(*phase, Phase::Running);
            assert!(error.is_assertion(), "error: {error}");
            assert!(!error.is_timeout());
            assert!(error.to_string().contains("BackoffLimitExceeded"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(env.public.namespaces().is_empty());
    assert!(env.private.namespaces().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_job_is_timeout_with_last_state() {
    let env = two_clusters();
    env.public.script_job(TEST_JOB, JobScript::never_finish());

    let report = Lifecycle::default()
        .execute(&env.planner, &scenario())
        .await
        .unwrap();

    let error = report.error().expect("run should fail");
    assert!(error.is_timeout());
    assert!(!error.is_assertion());
    assert!(error.to_string().contains("Running"));
    assert_eq!(env.public.deleted_namespaces(), vec!["public-echo-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_stops_before_tests() {
    let env = two_clusters();
    env.public.fail_creates_of("Deployment");

    let report = Lifecycle::default()
        .execute(&env.planner, &scenario())
        .await
        .unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::Failed {
            phase: Phase::Setup,
            error: ScenarioError::Context(_)
        }
    ));
    assert!(!report.phases.contains(&Phase::Running));
    assert!(env.public.job_names("public-echo-1").is_empty());
    assert_eq!(env.public.deleted_namespaces(), vec!["public-echo-1"]);
    assert_eq!(env.private.deleted_namespaces(), vec!["private-echo-1"]);
}

#[tokio::test]
async fn test_existing_namespace_fails_setup_loudly() {
    let env = two_clusters();
    use meshline::ClusterApi;
    env.private.create_namespace("private-echo-1").await.unwrap();

    let report = Lifecycle::default()
        .execute(&env.planner, &scenario())
        .await
        .unwrap();

    let error = report.error().expect("setup should fail");
    assert!(error.to_string().contains("already exists"));

    // Only the namespace this run created is removed
    assert_eq!(env.public.deleted_namespaces(), vec!["public-echo-1"]);
    assert!(env.private.deleted_namespaces().is_empty());
    assert!(env.private.has_namespace("private-echo-1"));
}

#[tokio::test(start_paused = true)]
async fn test_configured_wait_timeout_bounds_waits() {
    let env = two_clusters();
    env.public.script_job(TEST_JOB, JobScript::never_finish());
    env.private.script_job(TEST_JOB, JobScript::never_finish());
    let planner = env
        .planner
        .clone()
        .with_config(
            HarnessConfig::default()
                .poll_interval(Duration::from_millis(500))
                .wait_timeout(Duration::from_secs(20)),
        );
    let scenario = TcpEcho::new(SecretTokenLink::new()).namespace_id("echo");

    let report = Lifecycle::default()
        .execute(&planner, &scenario)
        .await
        .unwrap();

    match report.error() {
        Some(ScenarioError::Context(ContextError::WaitTimeout(wait))) => {
            assert_eq!(wait.timeout, Duration::from_secs(20));
            assert!(wait.resource.contains("public-echo-1"));
        }
        other => panic!("expected wait timeout, got {other:?}"),
    }
    assert!(report.teardown_warnings.is_empty());
}

#[tokio::test]
async fn test_no_credentials_skips_without_setup() {
    let provider = Arc::new(FakeProvider::new());
    let planner = Planner::new(CredentialSet::new()).with_shared_provider(provider.clone());

    let report = Lifecycle::default()
        .execute(&planner, &scenario())
        .await
        .unwrap();

    let reason = report.skipped_reason().expect("should skip");
    let text = reason.to_string();
    assert!(text.contains("1 public"));
    assert!(text.contains("1 private"));
    assert!(!report.phases.contains(&Phase::Setup));
    assert!(provider.connects().is_empty());
    report.into_result().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_still_tears_down() {
    let env = two_clusters();
    env.public.script_job(TEST_JOB, JobScript::never_finish());

    let lifecycle = Lifecycle::new(HarnessConfig::default());
    let token = lifecycle.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();
    });

    let report = lifecycle.execute(&env.planner, &scenario()).await.unwrap();

    assert!(matches!(
        report.error(),
        Some(ScenarioError::Cancelled {
            phase: Phase::Running
        })
    ));
    assert!(env.public.namespaces().is_empty());
    assert!(env.private.namespaces().is_empty());
}

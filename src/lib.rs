//! meshline - multi-cluster Kubernetes integration test harness
//!
//! meshline provisions, exercises and tears down test topologies that span
//! one or more Kubernetes clusters:
//!
//! - the [`Planner`] decides from declared [`ClusterNeeds`] and discovered
//!   credentials whether a test runs or is skipped, and builds one
//!   [`ClusterContext`] per `(role, index)` slot
//! - the [`Lifecycle`] drives Setup, RunTests and TearDown, with teardown
//!   on every exit path
//! - [`poll`](poll::poll) waits for services and jobs under a deadline
//!
//! # Example
//!
//! ```ignore
//! use meshline::Topology;
//!
//! #[meshline::test(public = 1, private = 1, namespace = "echo")]
//! async fn test_echo(topology: Topology) {
//!     let public = topology.public(1).unwrap();
//!     public.create_namespace().await.unwrap();
//!     // ...
//!     public.delete_namespace().await.unwrap();
//! }
//! ```
//!
//! # Running a scenario
//!
//! ```ignore
//! use meshline::{Lifecycle, Planner};
//! use meshline::link::SecretTokenLink;
//! use meshline::scenarios::TcpEcho;
//!
//! let report = Lifecycle::default()
//!     .execute(&Planner::from_env()?, &TcpEcho::new(SecretTokenLink::new()))
//!     .await?;
//! report.into_result()?;
//! ```
//!
//! # Environment Variables
//!
//! - `MESHLINE_PUBLIC_KUBECONFIGS` / `MESHLINE_PRIVATE_KUBECONFIGS` - kubeconfig paths per role
//! - `MESHLINE_ASSIGNMENT` - `auto`, `per-index` or `shared`
//! - `MESHLINE_WAIT_TIMEOUT_SECS` - default readiness deadline
//! - `MESHLINE_KEEP_ALL=true` - keep namespaces after the run (debug mode)
//! - `MESHLINE_LOG` - log filter, taking precedence over `RUST_LOG`

pub mod cluster;
pub mod config;
pub mod context;
pub mod credentials;
pub mod lifecycle;
pub mod link;
pub mod poll;
pub mod provider;
pub mod scenarios;
pub mod telemetry;
pub mod testing;
pub mod topology;
pub mod wait;

// Re-export the test macro
pub use meshline_macros::test;

#[doc(hidden)]
pub mod __macro_support {
    pub use futures::FutureExt;
}

// Re-export commonly used types
pub use cluster::{ClusterApi, ClusterError, KubeCluster};
pub use config::{AssignmentMode, ConfigError, HarnessConfig};
pub use context::{ClusterContext, ContextError, JobState, Role};
pub use credentials::{Credential, CredentialSet, CredentialSource};
pub use lifecycle::{ClusterScenario, Lifecycle, Outcome, Phase, RunReport, ScenarioError, TeardownWarning};
pub use poll::{PollError, Probe};
pub use provider::{ClientProvider, KubeconfigProvider, ProviderError};
pub use telemetry::init_logging;
pub use topology::{ClusterNeeds, Plan, Planner, SkipReason, Topology, TopologyError};
pub use wait::WaitError;

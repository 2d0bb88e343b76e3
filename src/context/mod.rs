//! Per-cluster execution context
//!
//! A [`ClusterContext`] is one `(role, index)` slot of a topology: the
//! namespace the scenario works in, the credential that reaches the cluster,
//! and the client handle acquired for it. Contexts are built by the
//! [`Planner`](crate::topology::Planner) and stay read-only afterwards.
//!
//! # Errors
//!
//! Fallible methods return [`ContextError`], which keeps a timeout
//! ([`ContextError::WaitTimeout`]) distinct from a resource that reached a
//! failed terminal state ([`ContextError::JobFailed`]).

#![allow(clippy::missing_errors_doc)]

mod jobs;
mod namespace;
mod parsing;
mod readiness;
mod secrets;
pub mod types;
mod workload;

pub use jobs::job_state;
pub use parsing::extract_resource_name;
pub use types::{namespace_for, JobState, Role};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterApi, ClusterError};
use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::credentials::Credential;
use crate::poll::{poll, PollError, Poller, Transient};
use crate::wait::WaitError;

/// Identity and client handle for one cluster slot
#[derive(Clone)]
pub struct ClusterContext {
    /// Role of the slot
    pub role: Role,
    /// 1-based index within the role
    pub index: usize,
    /// Namespace this slot provisions, `<role>-<id>-<index>`
    pub namespace: String,
    /// Credential the client was built from
    pub credential: Credential,
    /// Control-plane handle, held for the whole scenario
    pub client: Arc<dyn ClusterApi>,
    /// Delay between readiness probes
    pub poll_interval: Duration,
    /// Deadline for waits when the caller does not pick one
    pub wait_timeout: Duration,
    /// Set once this context created its namespace; teardown deletes only those
    created_namespace: Arc<AtomicBool>,
    /// Aborts in-flight waits when cancelled
    pub cancel: Option<CancellationToken>,
}

impl ClusterContext {
    /// Context for `(role, index)` with its namespace derived from `namespace_id`
    pub fn new(
        role: Role,
        index: usize,
        namespace_id: &str,
        credential: Credential,
        client: Arc<dyn ClusterApi>,
    ) -> Self {
        Self {
            role,
            index,
            namespace: namespace_for(role, namespace_id, index),
            credential,
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            created_namespace: Arc::new(AtomicBool::new(false)),
            cancel: None,
        }
    }

    /// Set the default wait deadline
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Whether this context created the namespace it currently holds
    #[must_use]
    pub fn created_namespace(&self) -> bool {
        self.created_namespace.load(Ordering::SeqCst)
    }

    fn mark_namespace_created(&self, created: bool) {
        self.created_namespace.store(created, Ordering::SeqCst);
    }

    /// Set the readiness polling interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Abort waits on this context when `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poller for `resource` using this context's interval and cancellation
    fn poller(&self, resource: String, deadline: Instant) -> Poller {
        let poller = poll(resource).deadline(deadline).interval(self.poll_interval);
        match &self.cancel {
            Some(token) => poller.cancel_on(token.clone()),
            None => poller,
        }
    }

    /// `role-index` label for logs
    #[must_use]
    pub fn slot(&self) -> String {
        format!("{}-{}", self.role, self.index)
    }
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("role", &self.role)
            .field("index", &self.index)
            .field("namespace", &self.namespace)
            .field("credential", &self.credential)
            .field("poll_interval", &self.poll_interval)
            .field("wait_timeout", &self.wait_timeout)
            .field("created_namespace", &self.created_namespace())
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

/// Errors from ClusterContext operations
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to create namespace {namespace}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to delete namespace {namespace}: {source}")]
    Cleanup {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to create resource in {namespace}: {source}")]
    Apply {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to get resource in {namespace}: {source}")]
    Get {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to list resources in {namespace}: {source}")]
    List {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("{0}")]
    WaitTimeout(#[from] WaitError),

    #[error("job '{name}' in namespace {namespace} failed: {detail}")]
    JobFailed {
        namespace: String,
        name: String,
        detail: String,
    },

    #[error("wait for {resource} cancelled after {elapsed:?}")]
    Cancelled { resource: String, elapsed: Duration },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ContextError {
    /// Whether a wait ran out of time
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout(_))
    }
}

impl Transient for ContextError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Get { source, .. } | Self::Cluster(source) => source.is_transient(),
            _ => false,
        }
    }
}

impl From<PollError<ContextError>> for ContextError {
    fn from(err: PollError<ContextError>) -> Self {
        match err {
            PollError::Timeout(wait) => Self::WaitTimeout(wait),
            PollError::Failed(inner) => inner,
            PollError::Cancelled { resource, elapsed } => Self::Cancelled { resource, elapsed },
        }
    }
}

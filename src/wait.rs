//! Rich wait errors with debugging context
//!
//! Provides detailed error information when a readiness wait runs out of time.
//!
//! # Example
//!
//! ```ignore
//! match ctx.wait_job("tcp-echo", timeout).await {
//!     Err(ContextError::WaitTimeout(err)) => {
//!         println!("Resource: {}", err.resource);
//!         println!("Last state: {}", err.last_state);
//!         println!("Attempts: {}", err.attempts);
//!     }
//!     _ => {}
//! }
//! ```

use std::fmt;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Endpoints;

use crate::context::job_state;

/// Rich error context for a wait that hit its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitError {
    /// Resource reference (e.g., "job/tcp-echo in public-echo-1")
    pub resource: String,
    /// Description of the last observed state
    pub last_state: String,
    /// Last transient error seen by the predicate, if any
    pub last_error: Option<String>,
    /// How many times the predicate ran
    pub attempts: u32,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
}

impl WaitError {
    /// Create a new WaitError
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "unknown".to_string(),
            last_error: None,
            attempts: 0,
            elapsed,
            timeout,
        }
    }

    /// Set the last observed state
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    /// Set the last transient error
    #[must_use]
    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = error;
        self
    }

    /// Set the attempt count
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Wait timeout for {}", self.resource)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        if let Some(err) = &self.last_error {
            writeln!(f, "├─ Last error: {err}")?;
        }
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "└─ Timeout: {:?}", self.timeout)
    }
}

impl std::error::Error for WaitError {}

/// Helper trait for extracting state description from K8s resources
pub trait ResourceState {
    /// Get a human-readable description of the resource's current state
    fn state_description(&self) -> String;
}

impl ResourceState for Deployment {
    fn state_description(&self) -> String {
        let spec_replicas = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = self
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let unavailable = self
            .status
            .as_ref()
            .and_then(|s| s.unavailable_replicas)
            .unwrap_or(0);

        if unavailable > 0 {
            format!("{ready}/{spec_replicas} ready, {unavailable} unavailable")
        } else {
            format!("{ready}/{spec_replicas} ready")
        }
    }
}

impl ResourceState for Job {
    fn state_description(&self) -> String {
        let status = self.status.as_ref();
        let active = status.and_then(|s| s.active).unwrap_or(0);
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);

        format!(
            "{}, {} active, {} succeeded, {} failed",
            job_state(self),
            active,
            succeeded,
            failed
        )
    }
}

impl ResourceState for Endpoints {
    fn state_description(&self) -> String {
        let (ready, not_ready) = self
            .subsets
            .as_deref()
            .unwrap_or_default()
            .iter()
            .fold((0, 0), |(ready, not_ready), subset| {
                (
                    ready + subset.addresses.as_ref().map_or(0, Vec::len),
                    not_ready + subset.not_ready_addresses.as_ref().map_or(0, Vec::len),
                )
            });

        format!("{ready} ready endpoints, {not_ready} not ready")
    }
}

//! Cluster control-plane access
//!
//! The harness talks to every cluster through [`ClusterApi`], a narrow async
//! interface covering the resources a scenario provisions and polls:
//! namespaces, deployments, services, endpoints, jobs and secrets.
//!
//! [`KubeCluster`] implements it over a `kube::Client`. Tests substitute the
//! in-memory [`FakeCluster`](crate::testing::FakeCluster).

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Secret, Service};

use crate::poll::Transient;

mod kubernetes;

pub use kubernetes::KubeCluster;

/// Errors returned by cluster control-plane calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} '{name}': permission denied (check RBAC)")]
    Forbidden { kind: String, name: String },

    #[error("{kind} '{name}': cannot connect to Kubernetes API")]
    Unreachable { kind: String, name: String },

    #[error("{kind} '{name}': {message}")]
    Api {
        kind: String,
        name: String,
        message: String,
    },
}

impl ClusterError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn api(kind: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// A missing resource means "not created yet" while polling
impl Transient for ClusterError {
    fn is_transient(&self) -> bool {
        self.is_not_found()
    }
}

/// Control-plane operations the harness needs from one cluster
///
/// Every namespaced call takes the namespace explicitly so a single handle
/// can serve several namespaces on a shared cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a namespace; `AlreadyExists` if it is present
    async fn create_namespace(&self, name: &str) -> Result<Namespace, ClusterError>;

    /// Delete a namespace; `NotFound` if it is absent
    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints, ClusterError>;

    /// Create endpoints by hand, for a service without a selector
    async fn create_endpoints(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<Endpoints, ClusterError>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError>;

    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, ClusterError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_display() {
        let err = ClusterError::not_found("Job", "tcp-echo");
        assert_eq!(err.to_string(), "Job 'tcp-echo' not found");

        let err = ClusterError::already_exists("Namespace", "public-echo-1");
        assert!(err.to_string().contains("already exists"));

        let err = ClusterError::api("Service", "svc", "boom");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_only_not_found_is_transient() {
        assert!(ClusterError::not_found("Service", "a").is_transient());
        assert!(!ClusterError::already_exists("Service", "a").is_transient());
        assert!(!ClusterError::api("Service", "a", "x").is_transient());
        assert!(!ClusterError::Forbidden {
            kind: "Service".to_string(),
            name: "a".to_string(),
        }
        .is_transient());
    }
}

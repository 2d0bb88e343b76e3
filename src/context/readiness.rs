use super::parsing::extract_resource_name;
use super::{ClusterContext, ContextError};
use crate::poll::Probe;
use crate::wait::ResourceState;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

impl ClusterContext {
    /// Wait for a service to exist and have at least one ready endpoint
    ///
    /// Accepts both `"name"` and `"service/name"`. A service or endpoints
    /// object that does not exist yet is retried until `timeout`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// ctx.wait_service_ready("tcp-go-echo", Duration::from_secs(120)).await?;
    /// ```
    pub async fn wait_service_ready(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Service, ContextError> {
        self.wait_service_ready_until(name, Instant::now() + timeout)
            .await
    }

    /// Wait for a service with an absolute deadline
    pub async fn wait_service_ready_until(
        &self,
        name: &str,
        deadline: Instant,
    ) -> Result<Service, ContextError> {
        let name = extract_resource_name(name);

        debug!(
            namespace = %self.namespace,
            service = %name,
            "Waiting for service to be ready"
        );

        let service = self
            .poller(format!("service/{name} in {}", self.namespace), deadline)
            .until(|| self.probe_service(name))
            .await?;

        info!(namespace = %self.namespace, service = %name, "Service is ready");
        Ok(service)
    }

    /// IPs of the ready endpoints behind a service, empty when none are ready
    pub async fn ready_addresses(&self, name: &str) -> Result<Vec<String>, ContextError> {
        let endpoints = self
            .client
            .get_endpoints(&self.namespace, extract_resource_name(name))
            .await
            .map_err(|source| ContextError::Get {
                namespace: self.namespace.clone(),
                source,
            })?;
        Ok(ready_ips(&endpoints))
    }

    async fn probe_service(&self, name: &str) -> Result<Probe<Service>, ContextError> {
        let service = self
            .client
            .get_service(&self.namespace, name)
            .await
            .map_err(|source| ContextError::Get {
                namespace: self.namespace.clone(),
                source,
            })?;
        let endpoints = self
            .client
            .get_endpoints(&self.namespace, name)
            .await
            .map_err(|source| ContextError::Get {
                namespace: self.namespace.clone(),
                source,
            })?;

        if has_ready_address(&endpoints) {
            Ok(Probe::Ready(service))
        } else {
            Ok(Probe::Pending(endpoints.state_description()))
        }
    }
}

fn has_ready_address(endpoints: &Endpoints) -> bool {
    !ready_ips(endpoints).is_empty()
}

fn ready_ips(endpoints: &Endpoints) -> Vec<String> {
    endpoints
        .subsets
        .as_deref()
        .unwrap_or_default()
        .iter()
        .flat_map(|subset| subset.addresses.as_deref().unwrap_or_default())
        .map(|address| address.ip.clone())
        .collect()
}

use super::{ClusterContext, ContextError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use tracing::info;

impl ClusterContext {
    /// Create a deployment in this slot's namespace
    pub async fn deploy(&self, deployment: &Deployment) -> Result<Deployment, ContextError> {
        let mut deployment = deployment.clone();
        deployment.metadata.namespace = Some(self.namespace.clone());

        let created = self
            .client
            .create_deployment(&self.namespace, &deployment)
            .await
            .map_err(|source| ContextError::Apply {
                namespace: self.namespace.clone(),
                source,
            })?;

        info!(
            namespace = %self.namespace,
            name = ?created.metadata.name,
            "Created deployment"
        );
        Ok(created)
    }

    /// List deployments in this slot's namespace
    pub async fn deployments(&self) -> Result<Vec<Deployment>, ContextError> {
        self.client
            .list_deployments(&self.namespace)
            .await
            .map_err(|source| ContextError::List {
                namespace: self.namespace.clone(),
                source,
            })
    }

    /// Create a service in this slot's namespace
    pub async fn create_service(&self, service: &Service) -> Result<Service, ContextError> {
        let mut service = service.clone();
        service.metadata.namespace = Some(self.namespace.clone());

        let created = self
            .client
            .create_service(&self.namespace, &service)
            .await
            .map_err(|source| ContextError::Apply {
                namespace: self.namespace.clone(),
                source,
            })?;

        info!(
            namespace = %self.namespace,
            name = ?created.metadata.name,
            "Created service"
        );
        Ok(created)
    }

    /// Create endpoints backing a selectorless service
    pub async fn create_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints, ContextError> {
        let mut endpoints = endpoints.clone();
        endpoints.metadata.namespace = Some(self.namespace.clone());

        self.client
            .create_endpoints(&self.namespace, &endpoints)
            .await
            .map_err(|source| ContextError::Apply {
                namespace: self.namespace.clone(),
                source,
            })
    }
}

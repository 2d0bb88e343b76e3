use super::parsing::extract_resource_name;
use super::{ClusterContext, ContextError};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

impl ClusterContext {
    /// Create a secret in this slot's namespace
    pub async fn create_secret(&self, secret: &Secret) -> Result<Secret, ContextError> {
        let mut secret = secret.clone();
        secret.metadata.namespace = Some(self.namespace.clone());

        let created = self
            .client
            .create_secret(&self.namespace, &secret)
            .await
            .map_err(|source| ContextError::Apply {
                namespace: self.namespace.clone(),
                source,
            })?;

        debug!(
            namespace = %self.namespace,
            secret = ?created.metadata.name,
            "Created secret"
        );
        Ok(created)
    }

    /// Get a secret by name (`"name"` or `"secret/name"`)
    pub async fn get_secret(&self, name: &str) -> Result<Secret, ContextError> {
        self.client
            .get_secret(&self.namespace, extract_resource_name(name))
            .await
            .map_err(|source| ContextError::Get {
                namespace: self.namespace.clone(),
                source,
            })
    }
}

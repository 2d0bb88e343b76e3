//! Kubeconfig-backed client provider
//!
//! Connects to whatever cluster a kubeconfig file (and optional context)
//! points at. Cluster lifecycle is not managed.

use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, instrument};

use super::{ClientProvider, ProviderError};
use crate::cluster::{ClusterApi, KubeCluster};
use crate::credentials::Credential;

/// Builds `kube::Client`s from kubeconfig files
#[derive(Debug, Clone, Default)]
pub struct KubeconfigProvider;

impl KubeconfigProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Load the client config for `credential` with `namespace` as default
    pub async fn config(
        &self,
        namespace: &str,
        credential: &Credential,
    ) -> Result<Config, ProviderError> {
        let kubeconfig_error = |reason: String| ProviderError::Kubeconfig {
            path: credential.path.clone(),
            reason,
        };

        let kubeconfig =
            Kubeconfig::read_from(&credential.path).map_err(|e| kubeconfig_error(e.to_string()))?;

        let options = KubeConfigOptions {
            context: credential.context.clone(),
            ..Default::default()
        };

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| kubeconfig_error(e.to_string()))?;
        config.default_namespace = namespace.to_string();

        Ok(config)
    }
}

#[async_trait]
impl ClientProvider for KubeconfigProvider {
    #[instrument(skip(self, credential), fields(path = %credential.path.display(), provider = "kubeconfig"))]
    async fn connect(
        &self,
        namespace: &str,
        credential: &Credential,
    ) -> Result<Arc<dyn ClusterApi>, ProviderError> {
        let config = self.config(namespace, credential).await?;
        debug!(cluster_url = %config.cluster_url, "Loaded kubeconfig");

        let client = Client::try_from(config).map_err(|e| ProviderError::Client(e.to_string()))?;
        Ok(Arc::new(KubeCluster::new(client)))
    }

    fn name(&self) -> &'static str {
        "kubeconfig"
    }
}

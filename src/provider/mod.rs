//! Client providers
//!
//! A [`ClientProvider`] turns a [`Credential`] into a live control-plane
//! handle for one topology slot. The harness never creates or deletes
//! clusters; it only connects to clusters the credentials point at.
//!
//! - [`KubeconfigProvider`] (default): reads the kubeconfig file and builds
//!   a `kube::Client` scoped to the slot's namespace
//! - [`FakeProvider`](crate::testing::FakeProvider): in-memory clusters for
//!   tests

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::ClusterApi;
use crate::credentials::Credential;

mod kubeconfig;

pub use kubeconfig::KubeconfigProvider;

/// Error type for provider operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("cannot load kubeconfig {}: {reason}", path.display())]
    Kubeconfig { path: PathBuf, reason: String },

    #[error("cannot build client: {0}")]
    Client(String),
}

/// Trait for client providers
#[async_trait]
pub trait ClientProvider: Send + Sync {
    /// Build a handle for `credential`, defaulting to `namespace`
    async fn connect(
        &self,
        namespace: &str,
        credential: &Credential,
    ) -> Result<Arc<dyn ClusterApi>, ProviderError>;

    /// Provider name for display
    fn name(&self) -> &'static str;
}

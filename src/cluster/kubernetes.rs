use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::{debug, info};

use super::{ClusterApi, ClusterError};

/// Label put on every namespace the harness creates
pub(crate) const MANAGED_LABEL: &str = "meshline.io/test";

/// [`ClusterApi`] backed by a live Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying kube client, for calls outside [`ClusterApi`]
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn create_in<K>(&self, namespace: &str, resource: &K) -> Result<K, ClusterError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + serde::Serialize
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let kind = K::kind(&Default::default()).to_string();
        let name = resource.meta().name.clone().unwrap_or_default();

        let created = api
            .create(&PostParams::default(), resource)
            .await
            .map_err(|e| classify(&e, &kind, &name))?;

        info!(namespace = %namespace, kind = %kind, name = %name, "Created resource");
        Ok(created)
    }

    async fn get_in<K>(&self, namespace: &str, name: &str) -> Result<K, ClusterError>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let kind = K::kind(&Default::default()).to_string();

        api.get(name).await.map_err(|e| classify(&e, &kind, name))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    [(MANAGED_LABEL.to_string(), "true".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = namespaces
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| classify(&e, "Namespace", name))?;

        info!(namespace = %name, "Created namespace");
        Ok(created)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        namespaces
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(&e, "Namespace", name))?;

        info!(namespace = %name, "Deleted namespace");
        Ok(())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        self.create_in(namespace, deployment).await
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(&e, "Deployment", namespace))?;

        debug!(namespace = %namespace, count = list.items.len(), "Listed deployments");
        Ok(list.items)
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        self.create_in(namespace, service).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.get_in(namespace, name).await
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints, ClusterError> {
        self.get_in(namespace, name).await
    }

    async fn create_endpoints(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<Endpoints, ClusterError> {
        self.create_in(namespace, endpoints).await
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        self.create_in(namespace, job).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        self.get_in(namespace, name).await
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ClusterError> {
        self.create_in(namespace, secret).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        self.get_in(namespace, name).await
    }
}

/// Map a kube error onto the harness taxonomy
///
/// API status codes decide NotFound/AlreadyExists/Forbidden; anything else is
/// matched on the message text to give a readable error.
fn classify(err: &kube::Error, kind: &str, name: &str) -> ClusterError {
    if let kube::Error::Api(response) = err {
        match response.code {
            404 => return ClusterError::not_found(kind, name),
            409 => return ClusterError::already_exists(kind, name),
            403 => {
                return ClusterError::Forbidden {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            _ => {}
        }
    }

    let raw = err.to_string();

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return ClusterError::Unreachable {
            kind: kind.to_string(),
            name: name.to_string(),
        };
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return ClusterError::api(kind, name, "operation timed out");
    }

    ClusterError::api(kind, name, raw)
}

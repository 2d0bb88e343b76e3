//! In-memory test doubles
//!
//! [`FakeCluster`] implements [`ClusterApi`] over a mutex-guarded map of
//! objects, with knobs to script readiness and job outcomes and to inject
//! failures. [`FakeProvider`] hands out fake clusters keyed by kubeconfig
//! path so planner and lifecycle code can run without a control plane.
//!
//! # Example
//!
//! ```ignore
//! use meshline::testing::{FakeCluster, FakeProvider, JobScript};
//!
//! let cluster = Arc::new(FakeCluster::new());
//! cluster.script_job("tcp-echo", JobScript::succeed_after(2));
//!
//! let provider = FakeProvider::new().with_cluster("/kube/public", cluster.clone());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Namespace, Secret, Service,
};
use kube::api::ObjectMeta;

use crate::cluster::{ClusterApi, ClusterError};
use crate::credentials::Credential;
use crate::provider::{ClientProvider, ProviderError};

/// Scripted outcome for a job created on a [`FakeCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
    /// Polls (`get_job` calls) before the job finishes
    pub polls: u32,
    /// Final outcome, `None` to stay running forever
    pub outcome: Option<Result<(), String>>,
}

impl JobScript {
    /// Succeed on the `polls`-th observation after creation
    #[must_use]
    pub fn succeed_after(polls: u32) -> Self {
        Self {
            polls,
            outcome: Some(Ok(())),
        }
    }

    /// Fail with `reason` on the `polls`-th observation after creation
    #[must_use]
    pub fn fail_after(polls: u32, reason: impl Into<String>) -> Self {
        Self {
            polls,
            outcome: Some(Err(reason.into())),
        }
    }

    /// Stay running forever
    #[must_use]
    pub fn never_finish() -> Self {
        Self {
            polls: 0,
            outcome: None,
        }
    }
}

impl Default for JobScript {
    fn default() -> Self {
        Self::succeed_after(0)
    }
}

type Key = (String, String);

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeSet<String>,
    deleted_namespaces: Vec<String>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    /// Remaining `get_endpoints` calls before a selector-backed service has
    /// a ready address
    endpoint_delays: HashMap<Key, u32>,
    /// Endpoints created explicitly, for selectorless services
    endpoints: BTreeMap<Key, Endpoints>,
    jobs: BTreeMap<Key, Job>,
    job_polls: HashMap<Key, u32>,
    job_scripts: HashMap<String, JobScript>,
    secrets: BTreeMap<Key, Secret>,
    fail_namespace_deletes: bool,
    fail_creates: BTreeSet<&'static str>,
}

/// In-memory [`ClusterApi`]
///
/// Objects are stored as created. Services created through the API with a
/// selector get a ready endpoint immediately; selectorless services only have
/// the endpoints created for them, as on a real cluster. Jobs follow their
/// [`JobScript`] (success on first observation when none is set).
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn object_name(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

fn named_service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn endpoints(namespace: &str, name: &str, ready: bool) -> Endpoints {
    let address = EndpointAddress {
        ip: "10.0.0.1".to_string(),
        ..Default::default()
    };
    let subset = if ready {
        EndpointSubset {
            addresses: Some(vec![address]),
            ..Default::default()
        }
    } else {
        EndpointSubset {
            not_ready_addresses: Some(vec![address]),
            ..Default::default()
        }
    };

    Endpoints {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![subset]),
    }
}

fn scripted_status(script: &JobScript, polls: u32) -> JobStatus {
    let finished = polls >= script.polls;
    match (&script.outcome, finished) {
        (Some(Ok(())), true) => JobStatus {
            succeeded: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        },
        (Some(Err(reason)), true) => JobStatus {
            failed: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                reason: Some(reason.clone()),
                ..Default::default()
            }]),
            ..Default::default()
        },
        _ => JobStatus {
            active: Some(1),
            ..Default::default()
        },
    }
}

impl FakeCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from teardown checks
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_create(&self, kind: &'static str, name: &str) -> Result<(), ClusterError> {
        if self.state().fail_creates.contains(kind) {
            return Err(ClusterError::api(kind, name, "injected failure"));
        }
        Ok(())
    }

    /// Whether `namespace` currently exists
    #[must_use]
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.state().namespaces.contains(namespace)
    }

    /// Existing namespaces, sorted
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.state().namespaces.iter().cloned().collect()
    }

    /// Namespaces deleted so far, in deletion order
    #[must_use]
    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.state().deleted_namespaces.clone()
    }

    /// Names of the services in `namespace`
    #[must_use]
    pub fn service_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .services
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Names of the jobs in `namespace`
    #[must_use]
    pub fn job_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .jobs
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Names of the secrets in `namespace`
    #[must_use]
    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .secrets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Make every namespace deletion fail with an API error
    pub fn fail_namespace_deletes(&self) {
        self.state().fail_namespace_deletes = true;
    }

    /// Make every create of `kind` (e.g. `"Deployment"`) fail
    pub fn fail_creates_of(&self, kind: &'static str) {
        self.state().fail_creates.insert(kind);
    }

    /// Insert a service whose endpoints are ready
    pub fn add_ready_service(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        state
            .services
            .insert(key(namespace, name), named_service(namespace, name));
        state.endpoint_delays.insert(key(namespace, name), 0);
    }

    /// Insert a service whose endpoints never become ready
    pub fn add_service(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        state
            .services
            .insert(key(namespace, name), named_service(namespace, name));
        state.endpoint_delays.insert(key(namespace, name), u32::MAX);
    }

    /// Ready endpoints after `polls` more `get_endpoints` calls
    pub fn ready_endpoints_after(&self, namespace: &str, name: &str, polls: u32) {
        self.state()
            .endpoint_delays
            .insert(key(namespace, name), polls);
    }

    /// Script the outcome of jobs named `name` in any namespace
    pub fn script_job(&self, name: &str, script: JobScript) {
        self.state().job_scripts.insert(name.to_string(), script);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        self.check_create("Namespace", name)?;
        let mut state = self.state();
        if !state.namespaces.insert(name.to_string()) {
            return Err(ClusterError::already_exists("Namespace", name));
        }

        Ok(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        if state.fail_namespace_deletes {
            return Err(ClusterError::api("Namespace", name, "injected failure"));
        }
        if !state.namespaces.remove(name) {
            return Err(ClusterError::not_found("Namespace", name));
        }

        state.deployments.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _), _| ns != name);
        state.endpoints.retain(|(ns, _), _| ns != name);
        state.endpoint_delays.retain(|(ns, _), _| ns != name);
        state.jobs.retain(|(ns, _), _| ns != name);
        state.secrets.retain(|(ns, _), _| ns != name);
        state.deleted_namespaces.push(name.to_string());
        Ok(())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let name = object_name(&deployment.metadata);
        self.check_create("Deployment", &name)?;
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(ClusterError::already_exists("Deployment", name));
        }
        state.deployments.insert(k, deployment.clone());
        Ok(deployment.clone())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError> {
        Ok(self
            .state()
            .deployments
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<Service, ClusterError> {
        let name = object_name(&service.metadata);
        self.check_create("Service", &name)?;
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.services.contains_key(&k) {
            return Err(ClusterError::already_exists("Service", name));
        }
        let selected = service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.as_ref())
            .is_some_and(|selector| !selector.is_empty());
        if selected {
            state.endpoint_delays.entry(k.clone()).or_insert(0);
        }
        state.services.insert(k, service.clone());
        Ok(service.clone())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.state()
            .services
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Service", name))
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints, ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        if !state.services.contains_key(&k) {
            return Err(ClusterError::not_found("Endpoints", name));
        }

        if let Some(created) = state.endpoints.get(&k) {
            return Ok(created.clone());
        }
        let Some(delay) = state.endpoint_delays.get_mut(&k) else {
            return Err(ClusterError::not_found("Endpoints", name));
        };
        let ready = *delay == 0;
        if *delay != u32::MAX {
            *delay = delay.saturating_sub(1);
        }
        Ok(endpoints(namespace, name, ready))
    }

    async fn create_endpoints(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<Endpoints, ClusterError> {
        let name = object_name(&endpoints.metadata);
        self.check_create("Endpoints", &name)?;
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.endpoints.contains_key(&k) {
            return Err(ClusterError::already_exists("Endpoints", name));
        }
        state.endpoints.insert(k, endpoints.clone());
        Ok(endpoints.clone())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        let name = object_name(&job.metadata);
        self.check_create("Job", &name)?;
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.jobs.contains_key(&k) {
            return Err(ClusterError::already_exists("Job", name));
        }
        state.job_polls.insert(k.clone(), 0);
        state.jobs.insert(k, job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        let mut state = self.state();
        let k = key(namespace, name);
        let Some(mut job) = state.jobs.get(&k).cloned() else {
            return Err(ClusterError::not_found("Job", name));
        };

        let polls = state.job_polls.entry(k).or_insert(0);
        *polls += 1;
        let polls = *polls;

        let script = state.job_scripts.get(name).cloned().unwrap_or_default();
        job.status = Some(scripted_status(&script, polls));
        Ok(job)
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ClusterError> {
        let name = object_name(&secret.metadata);
        self.check_create("Secret", &name)?;
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.secrets.contains_key(&k) {
            return Err(ClusterError::already_exists("Secret", name));
        }
        state.secrets.insert(k, secret.clone());
        Ok(secret.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        self.state()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Secret", name))
    }
}

/// [`ClientProvider`] over [`FakeCluster`]s keyed by kubeconfig path
#[derive(Debug, Default)]
pub struct FakeProvider {
    clusters: HashMap<PathBuf, Arc<FakeCluster>>,
    connects: Mutex<Vec<(String, Credential)>>,
}

impl FakeProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `cluster` for credentials pointing at `path`
    #[must_use]
    pub fn with_cluster(mut self, path: impl Into<PathBuf>, cluster: Arc<FakeCluster>) -> Self {
        self.clusters.insert(path.into(), cluster);
        self
    }

    /// The cluster served for `path`, if any
    #[must_use]
    pub fn cluster(&self, path: impl AsRef<Path>) -> Option<Arc<FakeCluster>> {
        self.clusters.get(path.as_ref()).cloned()
    }

    /// `(namespace, credential)` of every connect call, in order
    #[must_use]
    pub fn connects(&self) -> Vec<(String, Credential)> {
        self.connects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ClientProvider for FakeProvider {
    async fn connect(
        &self,
        namespace: &str,
        credential: &Credential,
    ) -> Result<Arc<dyn ClusterApi>, ProviderError> {
        self.connects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((namespace.to_string(), credential.clone()));

        match self.clusters.get(&credential.path) {
            Some(cluster) => Ok(cluster.clone()),
            None => Err(ProviderError::Kubeconfig {
                path: credential.path.clone(),
                reason: "no fake cluster registered for this path".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

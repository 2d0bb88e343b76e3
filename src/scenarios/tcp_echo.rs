//! TCP echo across a site link
//!
//! Setup deploys `tcp-go-echo` on public cluster 1, exposes it through the
//! link, waits for it to serve and connects private cluster 1 with a token. RunTests then runs the
//! same echo client job in both namespaces: the service must answer on both
//! sides of the link.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use tokio::time::Instant;
use tracing::info;

use crate::context::Role;
use crate::lifecycle::{teardown_slots, ClusterScenario, ScenarioError, TeardownWarning};
use crate::link::{ServiceBinding, SiteLink};
use crate::topology::{ClusterNeeds, Topology};

pub const ECHO_NAME: &str = "tcp-go-echo";
pub const ECHO_IMAGE: &str = "quay.io/skupper/tcp-go-echo";
pub const ECHO_CONTAINER_PORT: i32 = 80;
/// Port the echo service is exposed on across the link
pub const ECHO_SERVICE_PORT: i32 = 9090;

pub const TEST_JOB: &str = "tcp-echo";
pub const TEST_IMAGE: &str = "quay.io/skupper/skupper-tests";
pub const TEST_COMMAND: [&str; 3] = ["/app/tcp_echo_test", "-test.run", "Job"];

const SLOTS: [(Role, usize); 2] = [(Role::Public, 1), (Role::Private, 1)];

/// The echo server deployment
#[must_use]
pub fn echo_deployment() -> Deployment {
    let labels: std::collections::BTreeMap<String, String> =
        [("application".to_string(), ECHO_NAME.to_string())]
            .into_iter()
            .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(ECHO_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: ECHO_NAME.to_string(),
                        image: Some(ECHO_IMAGE.to_string()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            protocol: Some("TCP".to_string()),
                            container_port: ECHO_CONTAINER_PORT,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// TCP echo scenario: one public and one private cluster
pub struct TcpEcho {
    link: Arc<dyn SiteLink>,
    namespace_id: String,
    test_image: String,
    timeout: Option<Duration>,
}

impl TcpEcho {
    pub fn new(link: impl SiteLink + 'static) -> Self {
        Self::with_shared_link(Arc::new(link))
    }

    pub fn with_shared_link(link: Arc<dyn SiteLink>) -> Self {
        Self {
            link,
            namespace_id: "tcp-echo".to_string(),
            test_image: TEST_IMAGE.to_string(),
            timeout: None,
        }
    }

    /// Seed for namespace names (`public-<id>-1`, `private-<id>-1`)
    #[must_use]
    pub fn namespace_id(mut self, id: impl Into<String>) -> Self {
        self.namespace_id = id.into();
        self
    }

    /// Image of the echo client job
    #[must_use]
    pub fn test_image(mut self, image: impl Into<String>) -> Self {
        self.test_image = image.into();
        self
    }

    /// Deadline for each group of waits, instead of the public context's
    /// `wait_timeout`
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn budget(&self, topology: &Topology) -> Result<Duration, ScenarioError> {
        match self.timeout {
            Some(timeout) => Ok(timeout),
            None => Ok(topology.public(1)?.wait_timeout),
        }
    }

    fn echo_binding() -> ServiceBinding {
        ServiceBinding::new(ECHO_NAME, ECHO_SERVICE_PORT)
            .target_port(ECHO_CONTAINER_PORT)
            .select("application", ECHO_NAME)
    }
}

impl std::fmt::Debug for TcpEcho {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpEcho")
            .field("namespace_id", &self.namespace_id)
            .field("test_image", &self.test_image)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterScenario for TcpEcho {
    fn name(&self) -> &str {
        "tcp-echo"
    }

    fn needs(&self) -> ClusterNeeds {
        ClusterNeeds::new(self.namespace_id.clone()).public(1).private(1)
    }

    async fn setup(&self, topology: &Topology) -> Result<(), ScenarioError> {
        let public = topology.public(1)?;
        let private = topology.private(1)?;

        public.create_namespace().await?;
        private.create_namespace().await?;

        let created = public.deploy(&echo_deployment()).await?;
        info!(namespace = %public.namespace, name = ?created.metadata.name, "Echo server deployed");

        for deployment in public.deployments().await? {
            info!(
                namespace = %public.namespace,
                name = ?deployment.metadata.name,
                replicas = ?deployment.spec.as_ref().and_then(|s| s.replicas),
                "Deployment"
            );
        }

        self.link.init_site(public).await?;
        self.link.expose(public, &Self::echo_binding()).await?;
        public
            .wait_service_ready(ECHO_NAME, self.budget(topology)?)
            .await?;
        let token = self.link.issue_token(public).await?;

        self.link.init_site(private).await?;
        self.link.redeem_token(private, &token).await?;

        Ok(())
    }

    async fn run_tests(&self, topology: &Topology) -> Result<(), ScenarioError> {
        let sides = [topology.public(1)?, topology.private(1)?];
        let budget = self.budget(topology)?;

        let deadline = Instant::now() + budget;
        for ctx in sides {
            ctx.wait_service_ready_until(ECHO_NAME, deadline).await?;
        }

        // Same client on both sides: the link must make the service
        // reachable from the private cluster too.
        for ctx in sides {
            ctx.create_test_job(TEST_JOB, &self.test_image, &TEST_COMMAND)
                .await?;
        }

        let deadline = Instant::now() + budget;
        for ctx in sides {
            let job = ctx.wait_job_until(TEST_JOB, deadline).await?;
            ctx.assert_job(&job)?;
            info!(slot = %ctx.slot(), namespace = %ctx.namespace, "Echo job passed");
        }

        Ok(())
    }

    async fn tear_down(&self, topology: &Topology, timeout: Duration) -> Vec<TeardownWarning> {
        teardown_slots(topology, &SLOTS, timeout).await
    }
}

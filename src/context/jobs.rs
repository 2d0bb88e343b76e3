use super::parsing::extract_resource_name;
use super::types::JobState;
use super::{ClusterContext, ContextError};
use crate::poll::Probe;
use crate::wait::ResourceState;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::api::ObjectMeta;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Retries a test job gets before it is marked failed
const TEST_JOB_BACKOFF_LIMIT: i32 = 3;

/// Derive a job's state from its status
///
/// `Complete`/`Failed` conditions win; otherwise the pod counters decide.
#[must_use]
pub fn job_state(job: &Job) -> JobState {
    let Some(status) = job.status.as_ref() else {
        return JobState::Pending;
    };

    let condition_true = |kind: &str| {
        status
            .conditions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == kind && c.status == "True")
    };

    if condition_true("Failed") {
        return JobState::Failed;
    }
    if condition_true("Complete") {
        return JobState::Succeeded;
    }

    let spec = job.spec.as_ref();
    let completions = spec.and_then(|s| s.completions).unwrap_or(1);
    let backoff_limit = spec.and_then(|s| s.backoff_limit).unwrap_or(6);
    let active = status.active.unwrap_or(0);

    if status.succeeded.unwrap_or(0) >= completions && active == 0 {
        JobState::Succeeded
    } else if status.failed.unwrap_or(0) > backoff_limit {
        JobState::Failed
    } else if active > 0 {
        JobState::Running
    } else {
        JobState::Pending
    }
}

/// Best available explanation of a failed job
fn failure_detail(job: &Job) -> String {
    let status = job.status.as_ref();
    let condition = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True");

    match condition {
        Some(c) => match (c.reason.as_deref(), c.message.as_deref()) {
            (Some(reason), Some(message)) => format!("{reason}: {message}"),
            (Some(reason), None) => reason.to_string(),
            (None, Some(message)) => message.to_string(),
            (None, None) => "job reported Failed condition".to_string(),
        },
        None => format!(
            "{} failed pod(s)",
            status.and_then(|s| s.failed).unwrap_or(0)
        ),
    }
}

impl ClusterContext {
    /// Create a job in this slot's namespace
    pub async fn create_job(&self, job: &Job) -> Result<Job, ContextError> {
        let mut job = job.clone();
        job.metadata.namespace = Some(self.namespace.clone());

        let created = self
            .client
            .create_job(&self.namespace, &job)
            .await
            .map_err(|source| ContextError::Apply {
                namespace: self.namespace.clone(),
                source,
            })?;

        info!(namespace = %self.namespace, name = ?created.metadata.name, "Created job");
        Ok(created)
    }

    /// Create a single-container job that runs `command` from `image`
    ///
    /// The container never restarts in place; failed pods are retried by the
    /// job controller up to a small backoff limit.
    pub async fn create_test_job(
        &self,
        name: &str,
        image: &str,
        command: &[&str],
    ) -> Result<Job, ContextError> {
        let job = Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(TEST_JOB_BACKOFF_LIMIT),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some([("job".to_string(), name.to_string())].into_iter().collect()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: name.to_string(),
                            image: Some(image.to_string()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(command.iter().map(|s| (*s).to_string()).collect()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        self.create_job(&job).await
    }

    /// Wait for a job to reach a terminal state (Succeeded or Failed)
    ///
    /// Returns the job either way; use [`assert_job`](Self::assert_job) or
    /// [`wait_job_succeeded`](Self::wait_job_succeeded) to fail on `Failed`.
    pub async fn wait_job(&self, name: &str, timeout: Duration) -> Result<Job, ContextError> {
        self.wait_job_until(name, Instant::now() + timeout).await
    }

    /// Wait for a terminal job state with an absolute deadline
    pub async fn wait_job_until(&self, name: &str, deadline: Instant) -> Result<Job, ContextError> {
        let name = extract_resource_name(name);

        debug!(namespace = %self.namespace, job = %name, "Waiting for job to finish");

        let job = self
            .poller(format!("job/{name} in {}", self.namespace), deadline)
            .until(|| self.probe_job(name))
            .await?;

        info!(namespace = %self.namespace, job = %name, state = %job_state(&job), "Job finished");
        Ok(job)
    }

    /// Check a finished job: Succeeded passes, Failed is an error
    pub fn assert_job(&self, job: &Job) -> Result<(), ContextError> {
        match job_state(job) {
            JobState::Succeeded => Ok(()),
            JobState::Failed => {
                let detail = failure_detail(job);
                warn!(namespace = %self.namespace, job = ?job.metadata.name, detail = %detail, "Job failed");
                Err(ContextError::JobFailed {
                    namespace: self.namespace.clone(),
                    name: job.metadata.name.clone().unwrap_or_default(),
                    detail,
                })
            }
            state => Err(ContextError::JobFailed {
                namespace: self.namespace.clone(),
                name: job.metadata.name.clone().unwrap_or_default(),
                detail: format!("job has not finished (state {state})"),
            }),
        }
    }

    /// Wait for a job to finish and require that it succeeded
    pub async fn wait_job_succeeded(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Job, ContextError> {
        let job = self.wait_job(name, timeout).await?;
        self.assert_job(&job)?;
        Ok(job)
    }

    async fn probe_job(&self, name: &str) -> Result<Probe<Job>, ContextError> {
        let job = self
            .client
            .get_job(&self.namespace, name)
            .await
            .map_err(|source| ContextError::Get {
                namespace: self.namespace.clone(),
                source,
            })?;

        if job_state(&job).is_terminal() {
            Ok(Probe::Ready(job))
        } else {
            Ok(Probe::Pending(job.state_description()))
        }
    }
}

//! Topology planning
//!
//! A scenario declares its [`ClusterNeeds`]; the [`Planner`] compares them
//! with the credentials a [`CredentialSource`] can offer and either skips the
//! test or builds one [`ClusterContext`] per `(role, index)` slot.
//!
//! The skip-or-proceed rule lives in the pure function [`decide`], so it can
//! be tested without touching credentials or clients.
//!
//! # Example
//!
//! ```ignore
//! use meshline::topology::{ClusterNeeds, Plan, Planner};
//!
//! let needs = ClusterNeeds::new("echo").public(1).private(1);
//! match Planner::from_env()?.build(&needs).await? {
//!     Plan::Ready(topology) => {
//!         let public = topology.public(1)?;
//!         assert_eq!(public.namespace, "public-echo-1");
//!     }
//!     Plan::Skip(reason) => eprintln!("skipped: {reason}"),
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{AssignmentMode, ConfigError, HarnessConfig};
use crate::context::{ClusterContext, Role};
use crate::credentials::{Credential, CredentialSet, CredentialSource};
use crate::provider::{ClientProvider, KubeconfigProvider, ProviderError};

/// How many clusters of each role a scenario requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNeeds {
    /// Seed for namespace names
    pub namespace_id: String,
    pub public_clusters: usize,
    pub private_clusters: usize,
}

impl ClusterNeeds {
    /// No clusters yet; add them with [`public`](Self::public) and [`private`](Self::private)
    pub fn new(namespace_id: impl Into<String>) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            public_clusters: 0,
            private_clusters: 0,
        }
    }

    #[must_use]
    pub fn public(mut self, count: usize) -> Self {
        self.public_clusters = count;
        self
    }

    #[must_use]
    pub fn private(mut self, count: usize) -> Self {
        self.private_clusters = count;
        self
    }

    /// Required count for `role`
    #[must_use]
    pub fn required(&self, role: Role) -> usize {
        match role {
            Role::Public => self.public_clusters,
            Role::Private => self.private_clusters,
        }
    }

    /// Total number of slots
    #[must_use]
    pub fn total(&self) -> usize {
        self.public_clusters + self.private_clusters
    }
}

/// Credentials available per role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Availability {
    pub public: usize,
    pub private: usize,
    /// Whether the credentials reach more than one distinct cluster
    pub multiple_clusters: bool,
}

impl Availability {
    /// Snapshot the counts of `source`
    pub fn of(source: &dyn CredentialSource) -> Self {
        Self {
            public: source.count(Role::Public),
            private: source.count(Role::Private),
            multiple_clusters: source.multiple_clusters(),
        }
    }

    #[must_use]
    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::Public => self.public,
            Role::Private => self.private,
        }
    }
}

/// Why a test does not apply in this environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReason {
    pub needs: ClusterNeeds,
    pub availability: Availability,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "this test needs {} public and {} private clusters ({} public and {} private available)",
            self.needs.public_clusters,
            self.needs.private_clusters,
            self.availability.public,
            self.availability.private,
        )
    }
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Build the topology using the given (resolved) assignment mode
    Proceed(AssignmentMode),
    Skip(SkipReason),
}

/// Resolve `Auto` against what the credentials reach
#[must_use]
pub fn resolve_mode(mode: AssignmentMode, availability: &Availability) -> AssignmentMode {
    match mode {
        AssignmentMode::Auto if availability.multiple_clusters => AssignmentMode::PerIndex,
        AssignmentMode::Auto => AssignmentMode::Shared,
        other => other,
    }
}

/// Decide whether `needs` can be met by `availability`
///
/// `PerIndex` needs one credential per index. `Shared` needs a credential
/// for every role that is required at all.
#[must_use]
pub fn decide(needs: &ClusterNeeds, availability: &Availability, mode: AssignmentMode) -> Decision {
    let mode = resolve_mode(mode, availability);

    let satisfied = Role::ALL.iter().all(|&role| {
        let required = needs.required(role);
        let available = availability.count(role);
        match mode {
            AssignmentMode::Shared => required == 0 || available > 0,
            _ => available >= required,
        }
    });

    if satisfied {
        Decision::Proceed(mode)
    } else {
        Decision::Skip(SkipReason {
            needs: needs.clone(),
            availability: *availability,
        })
    }
}

/// Credential backing slot `index` (1-based) of a role
fn select_credential(
    credentials: &[Credential],
    index: usize,
    mode: AssignmentMode,
) -> Option<&Credential> {
    match (mode, credentials.len()) {
        (AssignmentMode::Shared, _) | (_, 1) => credentials.first(),
        _ => credentials.get(index.checked_sub(1)?),
    }
}

/// Errors from topology build and lookup
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("topology is empty: the test should have been skipped or was never built")]
    EmptyTopology,

    #[error("no {role} cluster with index {index} in this topology")]
    NotFound { role: Role, index: usize },

    #[error("duplicate slot {role}-{index} in topology")]
    Duplicate { role: Role, index: usize },

    #[error("no credential for {role} cluster {index}")]
    NoCredential { role: Role, index: usize },

    #[error("failed to connect to {role} cluster {index}: {source}")]
    Client {
        role: Role,
        index: usize,
        #[source]
        source: ProviderError,
    },
}

/// Result of [`Planner::build`]
#[derive(Debug)]
pub enum Plan {
    Ready(Topology),
    Skip(SkipReason),
}

impl Plan {
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Plan::Skip(_))
    }
}

/// The cluster contexts of one scenario run
///
/// Public slots `1..=N` come first, then private slots `1..=M`. Read-only
/// once built.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    contexts: Vec<ClusterContext>,
}

impl Topology {
    /// A topology with no contexts
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap already-built contexts, rejecting duplicate slots
    pub fn from_contexts(contexts: Vec<ClusterContext>) -> Result<Self, TopologyError> {
        for (i, ctx) in contexts.iter().enumerate() {
            if contexts[..i]
                .iter()
                .any(|other| other.role == ctx.role && other.index == ctx.index)
            {
                return Err(TopologyError::Duplicate {
                    role: ctx.role,
                    index: ctx.index,
                });
            }
        }
        Ok(Self { contexts })
    }

    /// Context for `(role, index)`
    ///
    /// An empty topology is reported as [`TopologyError::EmptyTopology`],
    /// never as `NotFound`.
    pub fn get(&self, role: Role, index: usize) -> Result<&ClusterContext, TopologyError> {
        if self.contexts.is_empty() {
            return Err(TopologyError::EmptyTopology);
        }
        self.contexts
            .iter()
            .find(|ctx| ctx.role == role && ctx.index == index)
            .ok_or(TopologyError::NotFound { role, index })
    }

    /// Public context `index`
    pub fn public(&self, index: usize) -> Result<&ClusterContext, TopologyError> {
        self.get(Role::Public, index)
    }

    /// Private context `index`
    pub fn private(&self, index: usize) -> Result<&ClusterContext, TopologyError> {
        self.get(Role::Private, index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterContext> {
        self.contexts.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Namespaces of every context, in topology order
    #[must_use]
    pub fn namespaces(&self) -> Vec<&str> {
        self.contexts.iter().map(|c| c.namespace.as_str()).collect()
    }

    /// Make every context's waits abort when `token` is cancelled
    #[must_use]
    pub fn with_cancel(self, token: &CancellationToken) -> Self {
        Self {
            contexts: self
                .contexts
                .into_iter()
                .map(|ctx| ctx.with_cancel(token.child_token()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Topology {
    type Item = &'a ClusterContext;
    type IntoIter = std::slice::Iter<'a, ClusterContext>;

    fn into_iter(self) -> Self::IntoIter {
        self.contexts.iter()
    }
}

/// Turns [`ClusterNeeds`] into a [`Plan`]
#[derive(Clone)]
pub struct Planner {
    credentials: Arc<dyn CredentialSource>,
    provider: Arc<dyn ClientProvider>,
    config: HarnessConfig,
    test_mode: bool,
}

impl Planner {
    /// Planner over `credentials` with the kubeconfig provider and default config
    pub fn new(credentials: impl CredentialSource + 'static) -> Self {
        Self {
            credentials: Arc::new(credentials),
            provider: Arc::new(KubeconfigProvider::new()),
            config: HarnessConfig::default(),
            test_mode: false,
        }
    }

    /// Planner with credentials and config taken from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(CredentialSet::from_env()).with_config(HarnessConfig::from_env()?))
    }

    /// Acquire clients through `provider` instead of kubeconfig files
    #[must_use]
    pub fn with_provider(mut self, provider: impl ClientProvider + 'static) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Share an already-boxed provider
    #[must_use]
    pub fn with_shared_provider(mut self, provider: Arc<dyn ClientProvider>) -> Self {
        self.provider = provider;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Return an empty topology instead of skipping
    #[must_use]
    pub fn test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Decide on `needs` and, when they can be met, connect every slot
    ///
    /// Not enough credentials is a [`Plan::Skip`]; a credential that cannot
    /// be turned into a client is an error.
    #[instrument(skip(self, needs), fields(namespace_id = %needs.namespace_id, provider = self.provider.name()))]
    pub async fn build(&self, needs: &ClusterNeeds) -> Result<Plan, TopologyError> {
        let availability = Availability::of(self.credentials.as_ref());

        let mode = match decide(needs, &availability, self.config.assignment) {
            Decision::Proceed(mode) => mode,
            Decision::Skip(_) if self.test_mode => {
                debug!("Test mode: returning empty topology instead of skipping");
                return Ok(Plan::Ready(Topology::empty()));
            }
            Decision::Skip(reason) => {
                info!(%reason, "Skipping");
                return Ok(Plan::Skip(reason));
            }
        };

        let mut contexts = Vec::with_capacity(needs.total());
        for role in Role::ALL {
            let credentials = self.credentials.credentials(role);
            for index in 1..=needs.required(role) {
                let credential = select_credential(&credentials, index, mode)
                    .cloned()
                    .ok_or(TopologyError::NoCredential { role, index })?;
                contexts.push(self.connect(needs, role, index, credential).await?);
            }
        }

        info!(contexts = contexts.len(), %mode, "Topology ready");
        Ok(Plan::Ready(Topology::from_contexts(contexts)?))
    }

    async fn connect(
        &self,
        needs: &ClusterNeeds,
        role: Role,
        index: usize,
        credential: Credential,
    ) -> Result<ClusterContext, TopologyError> {
        let namespace = crate::context::namespace_for(role, &needs.namespace_id, index);
        let client = self
            .provider
            .connect(&namespace, &credential)
            .await
            .map_err(|source| TopologyError::Client {
                role,
                index,
                source,
            })?;

        debug!(%role, index, %namespace, path = %credential.path.display(), "Connected");
        Ok(
            ClusterContext::new(role, index, &needs.namespace_id, credential, client)
                .with_poll_interval(self.config.poll_interval)
                .with_wait_timeout(self.config.wait_timeout),
        )
    }
}

impl fmt::Debug for Planner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Planner")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .field("test_mode", &self.test_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available(public: usize, private: usize, multiple_clusters: bool) -> Availability {
        Availability {
            public,
            private,
            multiple_clusters,
        }
    }

    fn needs(public: usize, private: usize) -> ClusterNeeds {
        ClusterNeeds::new("echo").public(public).private(private)
    }

    #[test]
    fn test_per_index_skips_when_short_on_either_role() {
        let mode = AssignmentMode::PerIndex;
        assert!(matches!(
            decide(&needs(1, 1), &available(1, 1, true), mode),
            Decision::Proceed(AssignmentMode::PerIndex)
        ));
        assert!(matches!(
            decide(&needs(2, 1), &available(1, 1, true), mode),
            Decision::Skip(_)
        ));
        assert!(matches!(
            decide(&needs(1, 2), &available(3, 1, true), mode),
            Decision::Skip(_)
        ));
        assert!(matches!(
            decide(&needs(0, 0), &available(0, 0, false), mode),
            Decision::Proceed(_)
        ));
    }

    #[test]
    fn test_shared_needs_only_one_credential_per_role() {
        let mode = AssignmentMode::Shared;
        assert!(matches!(
            decide(&needs(3, 2), &available(1, 1, false), mode),
            Decision::Proceed(AssignmentMode::Shared)
        ));
        assert!(matches!(
            decide(&needs(1, 1), &available(1, 0, false), mode),
            Decision::Skip(_)
        ));
        assert!(matches!(
            decide(&needs(1, 0), &available(1, 0, false), mode),
            Decision::Proceed(_)
        ));
    }

    #[test]
    fn test_auto_follows_cluster_count() {
        assert_eq!(
            resolve_mode(AssignmentMode::Auto, &available(2, 2, true)),
            AssignmentMode::PerIndex
        );
        assert_eq!(
            resolve_mode(AssignmentMode::Auto, &available(1, 1, false)),
            AssignmentMode::Shared
        );
        assert_eq!(
            resolve_mode(AssignmentMode::Shared, &available(2, 2, true)),
            AssignmentMode::Shared
        );
    }

    #[test]
    fn test_skip_reason_mentions_both_counts() {
        let Decision::Skip(reason) = decide(&needs(1, 1), &available(0, 0, false), AssignmentMode::Auto)
        else {
            panic!("expected skip");
        };
        assert_eq!(
            reason.to_string(),
            "this test needs 1 public and 1 private clusters (0 public and 0 private available)"
        );
    }

    #[test]
    fn test_select_credential() {
        let creds = vec![
            Credential::new("/a"),
            Credential::new("/b"),
            Credential::new("/c"),
        ];
        let path = |c: Option<&Credential>| c.map(|c| c.path.display().to_string());

        assert_eq!(path(select_credential(&creds, 2, AssignmentMode::PerIndex)), Some("/b".into()));
        assert_eq!(path(select_credential(&creds, 3, AssignmentMode::Shared)), Some("/a".into()));
        assert_eq!(path(select_credential(&creds, 4, AssignmentMode::PerIndex)), None);
        assert_eq!(path(select_credential(&creds, 0, AssignmentMode::PerIndex)), None);
        assert_eq!(
            path(select_credential(&creds[..1], 3, AssignmentMode::PerIndex)),
            Some("/a".into())
        );
        assert_eq!(path(select_credential(&[], 1, AssignmentMode::Shared)), None);
    }

    #[test]
    fn test_empty_topology_lookup_is_distinct() {
        let topology = Topology::empty();
        assert!(matches!(
            topology.get(Role::Public, 1),
            Err(TopologyError::EmptyTopology)
        ));
        assert!(topology.namespaces().is_empty());
    }
}

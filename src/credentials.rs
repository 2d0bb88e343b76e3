//! Credential discovery
//!
//! A credential is a kubeconfig file (plus optional context) that reaches one
//! cluster. The planner only needs to know how many exist per [`Role`] and
//! which one backs each slot, so discovery sits behind [`CredentialSource`].
//!
//! # Environment
//!
//! [`CredentialSet::from_env`] reads:
//! - `MESHLINE_PUBLIC_KUBECONFIGS` - comma-separated kubeconfig paths for public clusters
//! - `MESHLINE_PRIVATE_KUBECONFIGS` - comma-separated kubeconfig paths for private clusters
//!
//! With neither set, the first path of `KUBECONFIG` (or `~/.kube/config` when it
//! exists) serves both roles: one cluster, many namespaces.

use std::path::{Path, PathBuf};

use crate::context::Role;

pub const PUBLIC_KUBECONFIGS_ENV: &str = "MESHLINE_PUBLIC_KUBECONFIGS";
pub const PRIVATE_KUBECONFIGS_ENV: &str = "MESHLINE_PRIVATE_KUBECONFIGS";

/// One set of cluster credentials
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    /// Path to the kubeconfig file
    pub path: PathBuf,
    /// Kubeconfig context to use (current context when `None`)
    pub context: Option<String>,
}

impl Credential {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Source of per-role credentials
pub trait CredentialSource: Send + Sync {
    /// Credentials available for the role, in index order
    fn credentials(&self, role: Role) -> Vec<Credential>;

    /// Number of credentials available for the role
    fn count(&self, role: Role) -> usize {
        self.credentials(role).len()
    }

    /// Whether the credentials reach more than one distinct cluster
    fn multiple_clusters(&self) -> bool;
}

/// A fixed list of credentials per role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    public: Vec<Credential>,
    private: Vec<Credential>,
}

impl CredentialSet {
    /// Empty set: every build against it is skipped
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One kubeconfig shared by both roles
    pub fn shared(path: impl Into<PathBuf>) -> Self {
        let credential = Credential::new(path);
        Self {
            public: vec![credential.clone()],
            private: vec![credential],
        }
    }

    /// Add a public cluster credential
    #[must_use]
    pub fn public(mut self, credential: impl Into<Credential>) -> Self {
        self.public.push(credential.into());
        self
    }

    /// Add a private cluster credential
    #[must_use]
    pub fn private(mut self, credential: impl Into<Credential>) -> Self {
        self.private.push(credential.into());
        self
    }

    /// Discover credentials from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let home_default = std::env::var("HOME")
            .ok()
            .map(|home| Path::new(&home).join(".kube").join("config"))
            .filter(|path| path.exists());
        Self::from_lookup(|key| std::env::var(key).ok(), home_default)
    }

    /// Discover credentials through `lookup`, falling back to `default_kubeconfig`
    pub fn from_lookup<F>(lookup: F, default_kubeconfig: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let public = lookup(PUBLIC_KUBECONFIGS_ENV)
            .map(|v| split_paths(&v, ','))
            .unwrap_or_default();
        let private = lookup(PRIVATE_KUBECONFIGS_ENV)
            .map(|v| split_paths(&v, ','))
            .unwrap_or_default();

        match (public.is_empty(), private.is_empty()) {
            (false, false) => Self { public, private },
            // Private clusters default to the public ones
            (false, true) => Self {
                private: public.clone(),
                public,
            },
            (true, false) => Self {
                public: Vec::new(),
                private,
            },
            (true, true) => {
                let fallback = lookup("KUBECONFIG")
                    .and_then(|v| split_paths(&v, ':').into_iter().next())
                    .or_else(|| default_kubeconfig.map(Credential::new));
                match fallback {
                    Some(credential) => Self {
                        public: vec![credential.clone()],
                        private: vec![credential],
                    },
                    None => Self::default(),
                }
            }
        }
    }
}

impl From<&str> for Credential {
    fn from(path: &str) -> Self {
        Credential::new(path)
    }
}

impl From<PathBuf> for Credential {
    fn from(path: PathBuf) -> Self {
        Credential::new(path)
    }
}

impl CredentialSource for CredentialSet {
    fn credentials(&self, role: Role) -> Vec<Credential> {
        match role {
            Role::Public => self.public.clone(),
            Role::Private => self.private.clone(),
        }
    }

    fn multiple_clusters(&self) -> bool {
        let mut distinct: Vec<&Credential> = self.public.iter().chain(&self.private).collect();
        distinct.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.context.cmp(&b.context)));
        distinct.dedup();
        distinct.len() > 1
    }
}

fn split_paths(value: &str, separator: char) -> Vec<Credential> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(Credential::new)
        .collect()
}

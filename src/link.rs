//! Cross-cluster site linking
//!
//! A scenario connects two clusters by issuing a token on one site and
//! redeeming it on the other. [`SiteLink`] is the seam between scenarios and
//! whatever establishes that trust; [`SecretTokenLink`] carries the token as
//! a Secret and makes the issuer's exposed services addressable on the
//! redeeming side.
//!
//! The token records the ready endpoint IPs of every exposed service. The
//! redeeming site gets a selectorless Service of the same name plus an
//! Endpoints object pointing at those IPs, so the IPs must be routable from
//! the redeeming cluster (always true when both sites share one cluster).
//!
//! # Example
//!
//! ```ignore
//! let link = SecretTokenLink::new();
//! link.init_site(public).await?;
//! link.init_site(private).await?;
//! let echo = ServiceBinding::new("tcp-go-echo", 9090)
//!     .target_port(80)
//!     .select("application", "tcp-go-echo");
//! link.expose(public, &echo).await?;
//!
//! let token = link.issue_token(public).await?;
//! link.redeem_token(private, &token).await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Secret, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::context::{ClusterContext, ContextError};

/// Name of the Secret that marks an initialised site
pub const SITE_SECRET: &str = "meshline-site";

/// Label put on every object the link creates
pub const LINK_LABEL: &str = "meshline.io/link";

/// Errors from site-link operations
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("site in namespace {namespace} is not initialised")]
    SiteNotInitialised { namespace: String },

    #[error("site in namespace {namespace} is already initialised")]
    SiteExists { namespace: String },

    #[error("invalid link token: {0}")]
    InvalidToken(String),

    #[error("service {service} in namespace {namespace} has no ready endpoints to link")]
    NotReady { namespace: String, service: String },

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A service one site makes reachable through the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub name: String,
    pub port: i32,
    /// Container port behind `port`, same as `port` when unset
    pub target_port: Option<i32>,
    /// Pod selector on the exposing site
    pub selector: BTreeMap<String, String>,
    /// Ready endpoint IPs on the exposing site, recorded when a token is issued
    pub addresses: Vec<String>,
}

impl ServiceBinding {
    pub fn new(name: impl Into<String>, port: i32) -> Self {
        Self {
            name: name.into(),
            port,
            target_port: None,
            selector: BTreeMap::new(),
            addresses: Vec::new(),
        }
    }

    /// Forward to `port` on the selected pods
    #[must_use]
    pub fn target_port(mut self, port: i32) -> Self {
        self.target_port = Some(port);
        self
    }

    /// Add a selector label
    #[must_use]
    pub fn select(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }

    fn backend_port(&self) -> i32 {
        self.target_port.unwrap_or(self.port)
    }

    fn port_name(&self) -> String {
        format!("port{}", self.port)
    }

    fn service(&self, selector: Option<BTreeMap<String, String>>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(link_labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector,
                ports: Some(vec![ServicePort {
                    name: Some(self.port_name()),
                    port: self.port,
                    target_port: self.target_port.map(IntOrString::Int),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Endpoints for the redeemed, selectorless copy of this service
    fn endpoints(&self) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(link_labels()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    self.addresses
                        .iter()
                        .map(|ip| EndpointAddress {
                            ip: ip.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ports: Some(vec![EndpointPort {
                    name: Some(self.port_name()),
                    port: self.backend_port(),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        }
    }

    /// `name:port:target=ip;ip`
    fn encode(&self) -> String {
        format!(
            "{}:{}:{}={}",
            self.name,
            self.port,
            self.backend_port(),
            self.addresses.join(";")
        )
    }

    fn decode(entry: &str) -> Result<Self, LinkError> {
        let malformed = || LinkError::InvalidToken(format!("malformed service entry '{entry}'"));
        let (head, ips) = entry.split_once('=').ok_or_else(malformed)?;
        let mut parts = head.splitn(3, ':');
        let (Some(name), Some(port), Some(target)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        let parse = |raw: &str| {
            raw.parse::<i32>()
                .map_err(|_| LinkError::InvalidToken(format!("invalid port in '{entry}'")))
        };

        let mut binding = Self::new(name, parse(port)?).target_port(parse(target)?);
        binding.addresses = ips
            .split(';')
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect();
        if binding.addresses.is_empty() {
            return Err(LinkError::InvalidToken(format!(
                "service entry '{entry}' has no addresses"
            )));
        }
        Ok(binding)
    }
}

/// Token issued by one site and redeemed by another
#[derive(Debug, Clone, PartialEq)]
pub struct LinkToken {
    /// Namespace of the issuing site
    pub issuer: String,
    /// The Secret carrying the token
    pub secret: Secret,
}

impl LinkToken {
    /// Services the issuer exposed when the token was issued
    pub fn services(&self) -> Result<Vec<ServiceBinding>, LinkError> {
        let raw = self
            .secret
            .data
            .as_ref()
            .and_then(|data| data.get("services"))
            .ok_or_else(|| LinkError::InvalidToken("missing services entry".to_string()))?;
        let raw = std::str::from_utf8(&raw.0)
            .map_err(|e| LinkError::InvalidToken(format!("services entry is not UTF-8: {e}")))?;

        raw.split(',')
            .filter(|entry| !entry.is_empty())
            .map(ServiceBinding::decode)
            .collect()
    }
}

/// Establishes trust between two sites
#[async_trait]
pub trait SiteLink: Send + Sync {
    /// Prepare the context's namespace to take part in links
    async fn init_site(&self, ctx: &ClusterContext) -> Result<(), LinkError>;

    /// Make a service reachable from linked sites
    async fn expose(&self, ctx: &ClusterContext, binding: &ServiceBinding)
        -> Result<(), LinkError>;

    /// Produce a token other sites can redeem
    async fn issue_token(&self, ctx: &ClusterContext) -> Result<LinkToken, LinkError>;

    /// Link this site to the token's issuer
    async fn redeem_token(&self, ctx: &ClusterContext, token: &LinkToken) -> Result<(), LinkError>;
}

/// [`SiteLink`] that carries tokens as Secrets
///
/// Exposing creates a selector-backed Service on the issuing site. Issuing
/// requires every exposed service to have ready endpoints. Redeeming stores
/// the token Secret on the redeeming site and creates a Service of the same
/// name and port there, backed by Endpoints at the issuer's pod IPs.
#[derive(Debug, Default)]
pub struct SecretTokenLink {
    /// Exposed bindings per initialised site namespace
    sites: Mutex<HashMap<String, Vec<ServiceBinding>>>,
}

fn link_labels() -> BTreeMap<String, String> {
    [(LINK_LABEL.to_string(), "true".to_string())]
        .into_iter()
        .collect()
}

fn secret(name: &str, data: BTreeMap<String, ByteString>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(link_labels()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

impl SecretTokenLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sites(&self) -> MutexGuard<'_, HashMap<String, Vec<ServiceBinding>>> {
        self.sites.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_site(&self, ctx: &ClusterContext) -> Result<(), LinkError> {
        if self.sites().contains_key(&ctx.namespace) {
            Ok(())
        } else {
            Err(LinkError::SiteNotInitialised {
                namespace: ctx.namespace.clone(),
            })
        }
    }

    /// Bindings exposed by the site in `namespace`
    #[must_use]
    pub fn exposed(&self, namespace: &str) -> Vec<ServiceBinding> {
        self.sites().get(namespace).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SiteLink for SecretTokenLink {
    async fn init_site(&self, ctx: &ClusterContext) -> Result<(), LinkError> {
        if self.sites().contains_key(&ctx.namespace) {
            return Err(LinkError::SiteExists {
                namespace: ctx.namespace.clone(),
            });
        }

        let data = [(
            "site".to_string(),
            ByteString(ctx.namespace.clone().into_bytes()),
        )]
        .into_iter()
        .collect();
        ctx.create_secret(&secret(SITE_SECRET, data)).await?;

        self.sites().insert(ctx.namespace.clone(), Vec::new());
        info!(slot = %ctx.slot(), namespace = %ctx.namespace, "Site initialised");
        Ok(())
    }

    async fn expose(
        &self,
        ctx: &ClusterContext,
        binding: &ServiceBinding,
    ) -> Result<(), LinkError> {
        self.require_site(ctx)?;

        let selector = (!binding.selector.is_empty()).then(|| binding.selector.clone());
        ctx.create_service(&binding.service(selector)).await?;

        if let Some(bindings) = self.sites().get_mut(&ctx.namespace) {
            bindings.push(binding.clone());
        }
        debug!(namespace = %ctx.namespace, service = %binding.name, port = binding.port, "Exposed service");
        Ok(())
    }

    async fn issue_token(&self, ctx: &ClusterContext) -> Result<LinkToken, LinkError> {
        self.require_site(ctx)?;

        let mut entries = Vec::new();
        for mut binding in self.exposed(&ctx.namespace) {
            binding.addresses = ctx.ready_addresses(&binding.name).await?;
            if binding.addresses.is_empty() {
                return Err(LinkError::NotReady {
                    namespace: ctx.namespace.clone(),
                    service: binding.name,
                });
            }
            entries.push(binding.encode());
        }
        let services = entries.join(",");
        let data = [
            (
                "issuer".to_string(),
                ByteString(ctx.namespace.clone().into_bytes()),
            ),
            ("services".to_string(), ByteString(services.into_bytes())),
        ]
        .into_iter()
        .collect();

        let name = format!("link-{}", ctx.namespace);
        let created = ctx.create_secret(&secret(&name, data)).await?;

        info!(namespace = %ctx.namespace, token = %name, "Issued link token");
        Ok(LinkToken {
            issuer: ctx.namespace.clone(),
            secret: created,
        })
    }

    async fn redeem_token(&self, ctx: &ClusterContext, token: &LinkToken) -> Result<(), LinkError> {
        self.require_site(ctx)?;
        if token.issuer == ctx.namespace {
            return Err(LinkError::InvalidToken(format!(
                "site {} cannot redeem its own token",
                ctx.namespace
            )));
        }

        let services = token.services()?;

        let mut stored = token.secret.clone();
        stored.metadata = ObjectMeta {
            name: token.secret.metadata.name.clone(),
            labels: Some(link_labels()),
            ..Default::default()
        };
        ctx.create_secret(&stored).await?;

        for binding in &services {
            ctx.create_service(&binding.service(None)).await?;
            ctx.create_endpoints(&binding.endpoints()).await?;
        }

        info!(
            namespace = %ctx.namespace,
            issuer = %token.issuer,
            services = services.len(),
            "Redeemed link token"
        );
        Ok(())
    }
}

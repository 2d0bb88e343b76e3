//! Harness configuration
//!
//! Build it programmatically, or start from the environment with
//! [`HarnessConfig::from_env`].
//!
//! # Example
//!
//! ```
//! use meshline::config::{AssignmentMode, HarnessConfig};
//! use std::time::Duration;
//!
//! let config = HarnessConfig::default()
//!     .assignment(AssignmentMode::PerIndex)
//!     .wait_timeout(Duration::from_secs(300))
//!     .poll_interval(Duration::from_millis(500));
//!
//! assert_eq!(config.poll_interval, Duration::from_millis(500));
//! ```
//!
//! # Environment Variables
//!
//! - `MESHLINE_ASSIGNMENT` - `auto`, `per-index` or `shared`
//! - `MESHLINE_WAIT_TIMEOUT_SECS` - default deadline for readiness waits
//! - `MESHLINE_KEEP_ALL` - keep namespaces after the run (debug mode)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ASSIGNMENT_ENV: &str = "MESHLINE_ASSIGNMENT";
pub const WAIT_TIMEOUT_ENV: &str = "MESHLINE_WAIT_TIMEOUT_SECS";
pub const KEEP_ALL_ENV: &str = "MESHLINE_KEEP_ALL";

/// Time allowed for images to pull and resources to come up
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// How credentials are mapped onto slot indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssignmentMode {
    /// `PerIndex` when credentials reach several clusters, `Shared` otherwise
    #[default]
    Auto,
    /// Every index of a role needs its own credential
    PerIndex,
    /// All indices of a role share one cluster, each in its own namespace
    Shared,
}

impl FromStr for AssignmentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "per-index" | "per_index" | "multi" => Ok(Self::PerIndex),
            "shared" | "single" => Ok(Self::Shared),
            other => Err(ConfigError::InvalidValue {
                key: ASSIGNMENT_ENV.to_string(),
                value: other.to_string(),
                reason: "expected auto, per-index or shared".to_string(),
            }),
        }
    }
}

impl fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::PerIndex => "per-index",
            Self::Shared => "shared",
        };
        f.write_str(s)
    }
}

/// Settings shared by the planner, the poller and the lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Credential-to-index mapping
    pub assignment: AssignmentMode,

    /// Default deadline for readiness and job waits
    pub wait_timeout: Duration,

    /// Delay between readiness probes
    pub poll_interval: Duration,

    /// Bound on each teardown step (one namespace deletion); the whole
    /// teardown phase gets twice this
    pub teardown_timeout: Duration,

    /// Keep namespaces after the run instead of deleting them
    pub keep_namespaces: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            assignment: AssignmentMode::Auto,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            keep_namespaces: false,
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `MESHLINE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ASSIGNMENT_ENV) {
            config.assignment = value.parse()?;
        }

        if let Some(value) = lookup(WAIT_TIMEOUT_ENV) {
            let secs: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: WAIT_TIMEOUT_ENV.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            config.wait_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup(KEEP_ALL_ENV) {
            config.keep_namespaces = !matches!(value.trim(), "" | "0" | "false");
        }

        Ok(config)
    }

    /// Set the assignment mode
    #[must_use]
    pub fn assignment(mut self, mode: AssignmentMode) -> Self {
        self.assignment = mode;
        self
    }

    /// Set the default wait deadline
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the polling interval
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-step teardown bound
    #[must_use]
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Keep namespaces for debugging
    #[must_use]
    pub fn keep_namespaces(mut self, keep: bool) -> Self {
        self.keep_namespaces = keep;
        self
    }
}

//! Logging configuration for meshline
//!
//! Plain tracing-based logging to stderr. Harness logs carry structured
//! fields (`namespace`, `slot`, `role`) so interleaved output from several
//! clusters stays readable.
//!
//! The filter comes from `MESHLINE_LOG`, then `RUST_LOG`, then
//! [`DEFAULT_FILTER`]. The default keeps harness progress at `info` and
//! mutes the per-request chatter of the Kubernetes client below `warn`.
//!
//! # Example
//!
//! ```no_run
//! use meshline::telemetry::init_logging;
//!
//! init_logging();
//! // Logs will go to stderr with the configured level
//! ```

use std::env;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Harness-specific filter override, read before `RUST_LOG`
pub const LOG_ENV: &str = "MESHLINE_LOG";

/// Filter when neither `MESHLINE_LOG` nor `RUST_LOG` is set
pub const DEFAULT_FILTER: &str = "warn,meshline=info";

/// Pick the filter directives: first non-blank of `meshline_log`, `rust_log`,
/// else [`DEFAULT_FILTER`]
#[must_use]
pub fn filter_directives(meshline_log: Option<&str>, rust_log: Option<&str>) -> String {
    [meshline_log, rust_log]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|directives| !directives.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Parse directives, falling back to [`DEFAULT_FILTER`] when they are invalid
fn harness_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("[meshline] ignoring invalid log filter '{directives}': {e}");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Initialize logging with tracing-subscriber
///
/// Safe to call from every test; only the first call installs the
/// subscriber.
pub fn init_logging() {
    let directives = filter_directives(
        env::var(LOG_ENV).ok().as_deref(),
        env::var("RUST_LOG").ok().as_deref(),
    );
    let _ = tracing_subscriber::registry()
        .with(harness_filter(&directives))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

//! Operator settings read from the environment.

use std::time::Duration;

use tracing::warn;

/// Namespace to watch; unset means cluster-wide.
pub const ENV_WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";

/// Timeout in seconds for a single rebalance availability probe.
pub const ENV_PROBE_TIMEOUT_SECS: &str = "EMQX_OPERATOR_PROBE_TIMEOUT_SECS";

/// Number of pods evaluated concurrently within one pass.
pub const ENV_POD_CONCURRENCY: &str = "EMQX_OPERATOR_POD_CONCURRENCY";

/// Seconds between periodic re-evaluations of an EMQX instance.
pub const ENV_RESYNC_SECS: &str = "EMQX_OPERATOR_RESYNC_SECS";

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POD_CONCURRENCY: usize = 8;
const DEFAULT_RESYNC_SECS: u64 = 30;

/// Runtime configuration for the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace scope, `None` for cluster-wide.
    pub watch_namespace: Option<String>,
    /// Upper bound for one management API request.
    pub probe_timeout: Duration,
    /// Maximum pods evaluated at once.
    pub pod_concurrency: usize,
    /// Requeue interval after a successful pass.
    pub resync_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            pod_concurrency: DEFAULT_POD_CONCURRENCY,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECS),
        }
    }
}

impl OperatorConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let watch_namespace = lookup(ENV_WATCH_NAMESPACE).filter(|ns| !ns.trim().is_empty());

        let probe_secs = parse_or(&lookup, ENV_PROBE_TIMEOUT_SECS, DEFAULT_PROBE_TIMEOUT_SECS);
        let probe_timeout = Duration::from_secs(non_zero_or(probe_secs, DEFAULT_PROBE_TIMEOUT_SECS));

        let pod_concurrency = parse_or(&lookup, ENV_POD_CONCURRENCY, DEFAULT_POD_CONCURRENCY).max(1);

        let resync_secs = parse_or(&lookup, ENV_RESYNC_SECS, DEFAULT_RESYNC_SECS);
        let resync_interval = Duration::from_secs(non_zero_or(resync_secs, DEFAULT_RESYNC_SECS));

        Self {
            watch_namespace,
            probe_timeout,
            pod_concurrency,
            resync_interval,
        }
    }
}

/// Parse a numeric setting, warning and falling back to `default` when malformed.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key = %key, value = %raw, default = %default, "Invalid setting, using default");
            default
        }
    }
}

fn non_zero_or(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}

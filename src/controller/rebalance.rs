//! Rebalance-aware availability probe.
//!
//! Licensed broker nodes new enough to support load rebalancing expose an
//! availability check on the management API. A node that is being drained
//! answers with a non-200 status, so it must not be reported as serving even
//! though it is still a cluster member.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::client::{Credentials, ManagementTransport, Requester};
use crate::controller::common::{pod_ip, pod_key};
use crate::controller::status::ServingStatus;
use crate::crd::EmqxConfig;

/// Management API path reporting whether a node accepts traffic.
pub const AVAILABILITY_CHECK_PATH: &str = "api/v5/load_rebalance/availability_check";

/// Dashboard port used when the configuration does not name one.
pub const DEFAULT_DASHBOARD_PORT: &str = "18083";

/// Resolve the management port from the broker configuration.
pub fn resolve_port(config: &EmqxConfig) -> String {
    match config.dashboard_port() {
        Ok(Some(port)) => port,
        Ok(None) => DEFAULT_DASHBOARD_PORT.to_string(),
        Err(e) => {
            warn!(error = %e, default = DEFAULT_DASHBOARD_PORT, "Failed to read dashboard port from config");
            DEFAULT_DASHBOARD_PORT.to_string()
        }
    }
}

/// Map a management API response to a serving verdict.
pub fn status_from_response(status_code: u16) -> ServingStatus {
    if status_code == 200 {
        ServingStatus::Serving
    } else {
        ServingStatus::NotServing
    }
}

/// Join a pod IP and port into a URL authority, bracketing IPv6 addresses.
pub fn node_host(ip: &str, port: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]:{port}"),
        _ => format!("{ip}:{port}"),
    }
}

/// Probes a node's rebalance availability over the management API.
#[derive(Clone, Debug)]
pub struct RebalanceProber<T> {
    transport: T,
    port: String,
}

impl<T: ManagementTransport> RebalanceProber<T> {
    /// Create a prober using the port resolved from the broker configuration.
    pub fn new(transport: T, config: &EmqxConfig) -> Self {
        Self::with_port(transport, resolve_port(config))
    }

    /// Create a prober against an explicit port.
    pub fn with_port(transport: T, port: impl Into<String>) -> Self {
        Self {
            transport,
            port: port.into(),
        }
    }

    /// Port probed on every pod.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Check whether the pod's broker node is available for traffic.
    ///
    /// - no credentials: `NotServing`, no request is made
    /// - transport error or timeout: `Unknown`
    /// - HTTP 200: `Serving`, any other status: `NotServing`
    pub async fn probe_rebalance(
        &self,
        pod: &Pod,
        credentials: Option<&Credentials>,
    ) -> ServingStatus {
        let Some(credentials) = credentials else {
            debug!(pod = %pod_key(pod), "No management credentials, cannot verify rebalance state");
            return ServingStatus::NotServing;
        };

        // An unassigned IP produces an unroutable host; the transport error maps to Unknown
        let host = node_host(pod_ip(pod).unwrap_or_default(), &self.port);
        let requester = Requester::new(host, credentials.clone());

        match requester.get(&self.transport, AVAILABILITY_CHECK_PATH).await {
            Ok(code) => {
                let status = status_from_response(code);
                debug!(pod = %pod_key(pod), code, status = %status, "Rebalance availability checked");
                status
            }
            Err(e) => {
                warn!(pod = %pod_key(pod), error = %e, "Rebalance availability check failed");
                ServingStatus::Unknown
            }
        }
    }
}

//! Cluster membership classification.
//!
//! Matches a pod against the broker's own node records and decides whether
//! membership alone is enough, or whether the node is new enough to support
//! load rebalancing and must be probed.

use k8s_openapi::api::core::v1::Pod;
use semver::Version;
use tracing::warn;

use crate::controller::common::pod_uid;
use crate::crd::EmqxNode;

/// Lowest licensed version that exposes the rebalance availability check.
pub const REBALANCE_VERSION_FLOOR: Version = Version::new(5, 0, 3);

/// Outcome of matching a pod against the cluster's node records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Membership {
    /// No node record references the pod.
    NotMember,
    /// Member whose edition or version does not support rebalancing.
    MemberPlain,
    /// Licensed member at or above the version floor; must be probed.
    MemberGated,
}

/// Parse a broker version string.
///
/// A leading `v` is accepted and missing minor/patch components are padded,
/// so `5` and `5.0` read as `5.0.0`. Pre-release and build metadata follow
/// semantic versioning rules.
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('v').unwrap_or(raw);

    // Only pad the numeric core; suffixes start at the first '-' or '+'
    let core_end = raw.find(|c: char| c == '-' || c == '+').unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(core_end);
    let normalized = match core.matches('.').count() {
        0 => format!("{core}.0.0{suffix}"),
        1 => format!("{core}.0{suffix}"),
        _ => raw.to_string(),
    };

    Version::parse(&normalized)
}

/// Whether a version is at or above the rebalance floor.
pub fn is_at_or_above_floor(raw: &str) -> Result<bool, semver::Error> {
    Ok(parse_version(raw)? >= REBALANCE_VERSION_FLOOR)
}

/// Classify a single node record that is known to belong to the pod.
pub fn classify_node(node: &EmqxNode) -> Membership {
    if !node.is_enterprise() {
        return Membership::MemberPlain;
    }
    match is_at_or_above_floor(&node.version) {
        Ok(true) => Membership::MemberGated,
        Ok(false) => Membership::MemberPlain,
        Err(e) => {
            warn!(
                pod_uid = %node.pod_uid,
                version = %node.version,
                error = %e,
                "Unparseable node version, skipping rebalance check"
            );
            Membership::MemberPlain
        }
    }
}

/// Classify a pod against the cluster's node records.
pub fn classify_membership(pod: &Pod, nodes: &[EmqxNode]) -> Membership {
    let Some(uid) = pod_uid(pod) else {
        return Membership::NotMember;
    };
    nodes
        .iter()
        .find(|node| node.pod_uid == uid)
        .map_or(Membership::NotMember, classify_node)
}

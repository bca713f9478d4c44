//! Shared controller helpers for reading pod snapshots.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::controller::status::{CONTAINERS_READY, is_condition_true};

/// UID of the pod's controlling owner (its StatefulSet or ReplicaSet).
pub fn controller_uid(pod: &Pod) -> Option<&str> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
        .map(|r| r.uid.as_str())
}

/// UID of the pod itself.
pub fn pod_uid(pod: &Pod) -> Option<&str> {
    pod.metadata.uid.as_deref()
}

/// Pod IP address, if assigned.
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// Whether the kubelet reports all containers of the pod ready.
pub fn is_containers_ready(pod: &Pod) -> bool {
    is_condition_true(pod, CONTAINERS_READY)
}

/// `namespace/name` for logging.
pub fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.namespace().unwrap_or_else(|| "default".to_string()),
        pod.name_any()
    )
}

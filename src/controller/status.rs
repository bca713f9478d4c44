//! Serving condition helpers.
//!
//! Provides the tri-state serving verdict and helpers for building and
//! patching the `OnServing` pod condition.

use jiff::Timestamp;
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Pod condition type published by the operator.
pub const POD_ON_SERVING: &str = "OnServing";

/// Pod condition type set by the kubelet once every container is ready.
pub const CONTAINERS_READY: &str = "ContainersReady";

/// Whether a pod is serving broker traffic.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ServingStatus {
    /// Confirmed serving.
    Serving,
    /// Confirmed not serving. The pessimistic default.
    #[default]
    NotServing,
    /// Evidence was inconclusive (the probe could not reach the node).
    Unknown,
}

impl ServingStatus {
    /// Kubernetes condition status string.
    pub fn as_condition_status(&self) -> &'static str {
        match self {
            ServingStatus::Serving => "True",
            ServingStatus::NotServing => "False",
            ServingStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServingStatus::Serving => write!(f, "Serving"),
            ServingStatus::NotServing => write!(f, "NotServing"),
            ServingStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Find a condition of the given type on a pod.
pub fn find_condition<'a>(pod: &'a Pod, condition_type: &str) -> Option<&'a PodCondition> {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == condition_type))
}

/// Check if a pod condition type is true
pub fn is_condition_true(pod: &Pod, condition_type: &str) -> bool {
    find_condition(pod, condition_type).is_some_and(|c| c.status == "True")
}

/// Build the `OnServing` condition for a pod.
///
/// `lastProbeTime` is always `now`. `lastTransitionTime` is carried over from
/// `previous` when the status did not change.
pub fn on_serving_condition(
    status: ServingStatus,
    previous: Option<&PodCondition>,
    now: Timestamp,
) -> PodCondition {
    let status = status.as_condition_status();
    let last_transition_time = match previous {
        Some(prev) if prev.status == status && prev.last_transition_time.is_some() => {
            prev.last_transition_time.clone()
        }
        _ => Some(Time(now)),
    };

    PodCondition {
        type_: POD_ON_SERVING.to_string(),
        status: status.to_string(),
        last_probe_time: Some(Time(now)),
        last_transition_time,
        ..Default::default()
    }
}

/// Strategic merge patch body that sets exactly one pod status condition.
///
/// Pod conditions merge on `type`, so other condition types are untouched.
pub fn condition_patch(condition: &PodCondition) -> serde_json::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "status": {
            "conditions": [serde_json::to_value(condition)?]
        }
    }))
}

//! Ownership classification against the active update target.

use k8s_openapi::api::core::v1::Pod;

use crate::controller::common::controller_uid;

/// The StatefulSet and ReplicaSet currently being rolled out.
///
/// Either identity may be absent, in which case it never matches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveTarget {
    /// UID of the core StatefulSet under rollout.
    pub stateful_set_uid: Option<String>,
    /// UID of the replicant ReplicaSet under rollout.
    pub replica_set_uid: Option<String>,
}

impl ActiveTarget {
    pub fn new(stateful_set_uid: Option<String>, replica_set_uid: Option<String>) -> Self {
        Self {
            stateful_set_uid,
            replica_set_uid,
        }
    }

    /// Whether `uid` is one of the active target identities.
    pub fn matches(&self, uid: &str) -> bool {
        self.stateful_set_uid.as_deref() == Some(uid) || self.replica_set_uid.as_deref() == Some(uid)
    }
}

/// Whether the pod belongs to the generation currently being rolled out.
pub fn is_owned_by_active_target(pod: &Pod, target: &ActiveTarget) -> bool {
    controller_uid(pod).is_some_and(|uid| target.matches(uid))
}

//! Discovery of the active update target.
//!
//! The active StatefulSet (core nodes) and ReplicaSet (replicant nodes) are
//! the ones whose pod template hash label matches the update revision the
//! EMQX status reports for their node group.

use k8s_openapi::api::apps::v1::{ReplicaSet, StatefulSet};
use kube::{Api, Client, Resource, ResourceExt, api::ListParams};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::controller::ownership::ActiveTarget;
use crate::crd::{Emqx, LABEL_POD_TEMPLATE_HASH, label_selector};

/// Database role of core nodes.
pub const ROLE_CORE: &str = "core";

/// Database role of replicant nodes.
pub const ROLE_REPLICANT: &str = "replicant";

/// Pick the UID of the object labeled with the given pod template hash.
pub fn select_by_revision<K: Resource>(items: &[K], revision: &str) -> Option<String> {
    items
        .iter()
        .find(|item| {
            item.labels()
                .get(LABEL_POD_TEMPLATE_HASH)
                .is_some_and(|hash| hash == revision)
        })
        .and_then(|item| item.uid())
}

/// Look up the StatefulSet and ReplicaSet currently under rollout.
///
/// Listing failures are returned rather than treated as "no target".
pub async fn lookup_active_target(client: &Client, emqx: &Emqx) -> Result<ActiveTarget> {
    let namespace = emqx
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

    let stateful_set_uid = match emqx.core_update_revision() {
        Some(revision) => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
            let params = ListParams::default().labels(&label_selector(&emqx.role_labels(ROLE_CORE)));
            let list = api
                .list(&params)
                .await
                .map_err(|e| Error::input("list core StatefulSets", e))?;
            select_by_revision(&list.items, revision)
        }
        None => None,
    };

    let replica_set_uid = match emqx.replicant_update_revision() {
        Some(revision) if emqx.has_replicants() => {
            let api: Api<ReplicaSet> = Api::namespaced(client.clone(), &namespace);
            let params =
                ListParams::default().labels(&label_selector(&emqx.role_labels(ROLE_REPLICANT)));
            let list = api
                .list(&params)
                .await
                .map_err(|e| Error::input("list replicant ReplicaSets", e))?;
            select_by_revision(&list.items, revision)
        }
        _ => None,
    };

    debug!(
        name = %emqx.name_any(),
        stateful_set = ?stateful_set_uid,
        replica_set = ?replica_set_uid,
        "Resolved active update target"
    );

    Ok(ActiveTarget::new(stateful_set_uid, replica_set_uid))
}

//! EMQX Custom Resource Definition.
//!
//! The operator only reads this resource. Its status is maintained by the
//! cluster controller that talks to the broker, and carries the broker's own
//! view of which pods are cluster members.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::hocon::{self, ConfigError};

/// Label identifying the EMQX instance a resource belongs to.
pub const LABEL_INSTANCE: &str = "apps.emqx.io/instance";

/// Label identifying the operator managing a resource.
pub const LABEL_MANAGED_BY: &str = "apps.emqx.io/managed-by";

/// Label carrying the database role of a node group ("core" or "replicant").
pub const LABEL_DB_ROLE: &str = "apps.emqx.io/db-role";

/// Label carrying the pod template hash of a StatefulSet or ReplicaSet.
pub const LABEL_POD_TEMPLATE_HASH: &str = "apps.emqx.io/pod-template-hash";

/// Value of [`LABEL_MANAGED_BY`] for resources managed by this operator.
pub const MANAGED_BY: &str = "emqx-operator";

/// Edition string reported by licensed broker nodes.
pub const ENTERPRISE_EDITION: &str = "Enterprise";

/// EMQX describes a broker cluster made of core and replicant nodes.
///
/// Example:
/// ```yaml
/// apiVersion: apps.emqx.io/v2beta1
/// kind: EMQX
/// metadata:
///   name: emqx
/// spec:
///   image: emqx/emqx-enterprise:5.0.5
///   config:
///     data: |
///       dashboard.listeners.http.bind = 18083
///   coreTemplate:
///     spec:
///       replicas: 3
///   replicantTemplate:
///     spec:
///       replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.emqx.io",
    version = "v2beta1",
    kind = "EMQX",
    root = "Emqx",
    plural = "emqxes",
    shortname = "emqx",
    status = "EmqxStatus",
    namespaced,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EmqxSpec {
    /// Broker container image.
    pub image: String,

    /// Broker configuration.
    #[serde(default)]
    pub config: EmqxConfig,

    /// Core node group template.
    #[serde(default)]
    pub core_template: NodeTemplate,

    /// Replicant node group template. Absent means a core-only cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicant_template: Option<NodeTemplate>,
}

/// Broker configuration passed through to the nodes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmqxConfig {
    /// HOCON configuration text.
    #[serde(default)]
    pub data: String,
}

impl EmqxConfig {
    /// Port the dashboard / management API listens on, if configured.
    pub fn dashboard_port(&self) -> Result<Option<String>, ConfigError> {
        hocon::dashboard_port(&self.data)
    }
}

/// Template for a node group.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    #[serde(default)]
    pub spec: NodeTemplateSpec,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplateSpec {
    /// Desired number of nodes in the group.
    #[serde(default)]
    pub replicas: i32,
}

/// Status of an EMQX cluster as reported by the broker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmqxStatus {
    /// Core nodes known to the cluster.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub core_nodes: Vec<EmqxNode>,

    /// Rollout state of the core StatefulSet.
    #[serde(default)]
    pub core_nodes_status: NodesStatus,

    /// Replicant nodes known to the cluster.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replicant_nodes: Vec<EmqxNode>,

    /// Rollout state of the replicant ReplicaSet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicant_nodes_status: Option<NodesStatus>,
}

/// A cluster node record, as reported by the broker itself.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EmqxNode {
    /// UID of the pod running this node.
    #[serde(rename = "podUID", default)]
    pub pod_uid: String,

    /// Erlang node name (e.g. `emqx@10.0.0.1`).
    #[serde(default)]
    pub node: String,

    /// Node status as reported by the broker ("running", "stopped").
    #[serde(rename = "node_status", default)]
    pub node_status: String,

    /// Broker edition ("Opensource" or "Enterprise").
    #[serde(default)]
    pub edition: String,

    /// Broker version.
    #[serde(default)]
    pub version: String,

    /// Database role ("core" or "replicant").
    #[serde(default)]
    pub role: String,
}

impl EmqxNode {
    /// Whether this node runs the licensed edition.
    pub fn is_enterprise(&self) -> bool {
        self.edition == ENTERPRISE_EDITION
    }
}

/// Rollout state of a node group.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodesStatus {
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    /// Pod template hash of the generation currently serving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,

    /// Pod template hash of the generation being rolled out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_revision: Option<String>,
}

impl Emqx {
    /// Whether the cluster runs replicant nodes.
    pub fn has_replicants(&self) -> bool {
        self.spec
            .replicant_template
            .as_ref()
            .is_some_and(|t| t.spec.replicas > 0)
    }

    /// Node records to check pod membership against.
    ///
    /// Core nodes always count; replicant nodes only when the topology
    /// actually has replicants.
    pub fn membership_nodes(&self) -> Vec<EmqxNode> {
        let Some(status) = self.status.as_ref() else {
            return Vec::new();
        };
        let mut nodes = status.core_nodes.clone();
        if self.has_replicants() {
            nodes.extend(status.replicant_nodes.iter().cloned());
        }
        nodes
    }

    /// Labels selecting every pod of this instance.
    pub fn instance_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels().clone();
        labels.insert(LABEL_INSTANCE.to_string(), self.name_any());
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
        labels
    }

    /// Instance labels plus the database role label.
    pub fn role_labels(&self, role: &str) -> BTreeMap<String, String> {
        let mut labels = self.instance_labels();
        labels.insert(LABEL_DB_ROLE.to_string(), role.to_string());
        labels
    }

    /// Name of the Secret holding the management API bootstrap user.
    pub fn bootstrap_user_secret_name(&self) -> String {
        format!("{}-bootstrap-user", self.name_any())
    }

    /// Update revision of the core StatefulSet, if any.
    pub fn core_update_revision(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.core_nodes_status.update_revision.as_deref())
    }

    /// Update revision of the replicant ReplicaSet, if any.
    pub fn replicant_update_revision(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.replicant_nodes_status.as_ref())
            .and_then(|s| s.update_revision.as_deref())
    }
}

/// Render a label map as a Kubernetes label selector string.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

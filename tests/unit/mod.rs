// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for emqx-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation through the public API.

#[path = "../common/fixtures.rs"]
mod fixtures;

mod crd_tests {
    use emqx_operator::crd::{
        Emqx, LABEL_DB_ROLE, LABEL_INSTANCE, LABEL_MANAGED_BY, MANAGED_BY, label_selector,
    };

    use crate::fixtures::{EmqxBuilder, enterprise_node, node};

    #[test]
    fn test_deserialize_status_from_api_json() {
        let emqx: Emqx = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps.emqx.io/v2beta1",
            "kind": "EMQX",
            "metadata": { "name": "emqx", "namespace": "default" },
            "spec": {
                "image": "emqx/emqx-enterprise:5.0.5",
                "config": { "data": "dashboard.listeners.http.bind = 18084" },
                "replicantTemplate": { "spec": { "replicas": 2 } }
            },
            "status": {
                "coreNodes": [{
                    "podUID": "pod-0",
                    "node": "emqx@10.0.0.1",
                    "node_status": "running",
                    "edition": "Enterprise",
                    "version": "5.0.5",
                    "role": "core"
                }],
                "coreNodesStatus": { "updateRevision": "abc" },
                "replicantNodes": [{ "podUID": "pod-r", "edition": "Opensource" }],
                "replicantNodesStatus": { "updateRevision": "def" }
            }
        }))
        .unwrap();

        assert!(emqx.has_replicants());
        assert_eq!(emqx.core_update_revision(), Some("abc"));
        assert_eq!(emqx.replicant_update_revision(), Some("def"));
        let nodes = emqx.membership_nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].pod_uid, "pod-0");
        assert!(nodes[0].is_enterprise());
        assert!(!nodes[1].is_enterprise());
        assert_eq!(
            emqx.spec.config.dashboard_port().unwrap().as_deref(),
            Some("18084")
        );
    }

    #[test]
    fn test_replicant_nodes_ignored_without_replicants() {
        let emqx = EmqxBuilder::new("emqx")
            .core_node(enterprise_node("pod-0", "5.0.5"))
            .replicant_node(node("pod-r", "Enterprise", "5.0.5"))
            .build();

        let nodes = emqx.membership_nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].pod_uid, "pod-0");
    }

    #[test]
    fn test_instance_and_role_selectors() {
        let emqx = EmqxBuilder::new("broker").label("team", "iot").build();

        let labels = emqx.instance_labels();
        assert_eq!(labels.get(LABEL_INSTANCE).map(String::as_str), Some("broker"));
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY));
        assert_eq!(labels.get("team").map(String::as_str), Some("iot"));

        let selector = label_selector(&emqx.role_labels("core"));
        assert!(selector.contains(&format!("{LABEL_DB_ROLE}=core")));
        assert!(selector.contains(&format!("{LABEL_INSTANCE}=broker")));
    }

    #[test]
    fn test_bootstrap_user_secret_name() {
        let emqx = EmqxBuilder::new("broker").build();
        assert_eq!(emqx.bootstrap_user_secret_name(), "broker-bootstrap-user");
    }
}

mod status_tests {
    use jiff::Timestamp;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use emqx_operator::controller::status::{
        POD_ON_SERVING, ServingStatus, condition_patch, on_serving_condition,
    };

    #[test]
    fn test_condition_status_values() {
        assert_eq!(ServingStatus::Serving.as_condition_status(), "True");
        assert_eq!(ServingStatus::NotServing.as_condition_status(), "False");
        assert_eq!(ServingStatus::Unknown.as_condition_status(), "Unknown");
        assert_eq!(ServingStatus::default(), ServingStatus::NotServing);
    }

    #[test]
    fn test_transition_time_resets_on_change() {
        let earlier = Timestamp::from_second(1_700_000_000).unwrap();
        let now = Timestamp::from_second(1_700_000_060).unwrap();
        let previous = on_serving_condition(ServingStatus::Serving, None, earlier);

        let same = on_serving_condition(ServingStatus::Serving, Some(&previous), now);
        assert_eq!(same.last_transition_time, Some(Time(earlier)));
        assert_eq!(same.last_probe_time, Some(Time(now)));

        let changed = on_serving_condition(ServingStatus::Unknown, Some(&previous), now);
        assert_eq!(changed.last_transition_time, Some(Time(now)));
    }

    #[test]
    fn test_patch_body_targets_status_conditions() {
        let now = Timestamp::from_second(1_700_000_000).unwrap();
        let condition = on_serving_condition(ServingStatus::NotServing, None, now);
        let patch = condition_patch(&condition).unwrap();

        let conditions = patch["status"]["conditions"].as_array().unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["type"], POD_ON_SERVING);
        assert_eq!(conditions[0]["status"], "False");
    }
}

mod ownership_tests {
    use emqx_operator::controller::ownership::{ActiveTarget, is_owned_by_active_target};

    use crate::fixtures::{ACTIVE_RS_UID, ACTIVE_STS_UID, PodBuilder, STALE_STS_UID};

    #[test]
    fn test_owned_by_either_target() {
        let target = ActiveTarget::new(
            Some(ACTIVE_STS_UID.to_string()),
            Some(ACTIVE_RS_UID.to_string()),
        );
        let core = PodBuilder::new("core").owned_by(ACTIVE_STS_UID).build();
        let replicant = PodBuilder::new("replicant").owned_by(ACTIVE_RS_UID).build();
        let stale = PodBuilder::new("stale").owned_by(STALE_STS_UID).build();
        let orphan = PodBuilder::new("orphan").build();

        assert!(is_owned_by_active_target(&core, &target));
        assert!(is_owned_by_active_target(&replicant, &target));
        assert!(!is_owned_by_active_target(&stale, &target));
        assert!(!is_owned_by_active_target(&orphan, &target));
    }

    #[test]
    fn test_absent_target_never_matches() {
        let pod = PodBuilder::new("core").owned_by(ACTIVE_STS_UID).build();
        assert!(!is_owned_by_active_target(&pod, &ActiveTarget::default()));
    }
}

mod error_tests {
    use std::time::Duration;

    use emqx_operator::controller::error::Error;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(
            kube::core::Status::failure("test", "Test")
                .with_code(code)
                .boxed(),
        )
    }

    #[test]
    fn test_input_unavailable_classification() {
        let server = Error::input("list managed pods", api_error(500));
        assert!(server.is_retryable());
        assert_eq!(server.requeue_after(), Duration::from_secs(30));

        let forbidden = Error::input("list managed pods", api_error(403));
        assert!(!forbidden.is_retryable());
        assert_eq!(forbidden.requeue_after(), Duration::from_secs(300));
        assert!(forbidden.to_string().contains("list managed pods"));
    }

    #[test]
    fn test_not_found() {
        assert!(Error::Kube(api_error(404)).is_not_found());
        assert!(!Error::MissingField("metadata.namespace".to_string()).is_not_found());
    }
}

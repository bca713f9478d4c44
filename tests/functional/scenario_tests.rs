//! Whole-pass scenarios: each test builds a set of pods and node records,
//! runs one pass and checks which conditions were written and how many
//! management API calls were made.

use jiff::Timestamp;
use k8s_openapi::api::core::v1::PodCondition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tokio_util::sync::CancellationToken;

use emqx_operator::client::Credentials;
use emqx_operator::controller::ownership::ActiveTarget;
use emqx_operator::controller::pod_conditions::{PassInputs, PassSummary, update_pod_conditions};
use emqx_operator::controller::rebalance::RebalanceProber;
use emqx_operator::controller::status::POD_ON_SERVING;

use crate::fixtures::{
    ACTIVE_RS_UID, ACTIVE_STS_UID, PodBuilder, STALE_STS_UID, enterprise_node, node,
    ready_core_pod,
};
use crate::mock_state::{
    CancellingTransport, MockResponse, MockTransport, PassFixture, RecordingWriter,
};

fn core_target() -> ActiveTarget {
    ActiveTarget::new(Some(ACTIVE_STS_UID.to_string()), None)
}

#[tokio::test]
async fn test_pod_without_controller_is_never_written() {
    let pod = PodBuilder::new("orphan")
        .uid("pod-orphan")
        .containers_ready(true)
        .build();
    let fixture = PassFixture::new(core_target(), vec![enterprise_node("pod-orphan", "5.0.5")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    let summary = fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.evaluated(), 0);
    assert!(writer.writes().is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_containers_not_ready_is_not_serving() {
    let pod = PodBuilder::new("emqx-core-0")
        .uid("pod-0")
        .owned_by(ACTIVE_STS_UID)
        .containers_ready(false)
        .build();
    let fixture = PassFixture::new(core_target(), vec![enterprise_node("pod-0", "5.0.5")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("False"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_missing_containers_ready_condition_is_not_serving() {
    let pod = PodBuilder::new("emqx-core-0")
        .uid("pod-0")
        .owned_by(ACTIVE_STS_UID)
        .condition("Ready", "True")
        .build();
    let fixture = PassFixture::new(core_target(), vec![node("pod-0", "Opensource", "5.8.0")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("False"));
}

#[tokio::test]
async fn test_pod_not_listed_by_broker_is_not_serving() {
    let pod = ready_core_pod("emqx-core-0", "pod-0");
    let fixture = PassFixture::new(core_target(), vec![enterprise_node("someone-else", "5.0.5")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("False"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_open_source_member_serves_without_availability_check() {
    let pod = ready_core_pod("emqx-core-0", "pod-0");
    let fixture = PassFixture::new(core_target(), vec![node("pod-0", "Opensource", "5.8.0")]);
    let transport = MockTransport::status(503);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("True"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_enterprise_below_floor_serves_without_availability_check() {
    let pod = ready_core_pod("emqx-core-0", "pod-0");
    let fixture = PassFixture::new(core_target(), vec![enterprise_node("pod-0", "5.0.2")]);
    let transport = MockTransport::status(503);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("True"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_gated_member_follows_availability_check() {
    let cases = [
        (MockResponse::Status(200), "True"),
        (MockResponse::Status(503), "False"),
        (MockResponse::Timeout, "Unknown"),
    ];

    for (response, expected) in cases {
        let pod = ready_core_pod("emqx-core-0", "pod-0");
        let fixture = PassFixture::new(core_target(), vec![enterprise_node("pod-0", "5.0.5")]);
        let transport = MockTransport::new(response);
        let writer = RecordingWriter::new();

        fixture
            .run(&[pod], &transport, &writer, &CancellationToken::new())
            .await;

        assert_eq!(
            writer.status_of("emqx-core-0").as_deref(),
            Some(expected),
            "response {response:?}"
        );
        assert_eq!(transport.calls(), 1, "response {response:?}");
    }
}

#[tokio::test]
async fn test_availability_check_targets_pod_ip_and_path() {
    let pod = PodBuilder::new("emqx-core-0")
        .uid("pod-0")
        .owned_by(ACTIVE_STS_UID)
        .ip("10.1.2.3")
        .containers_ready(true)
        .build();
    let fixture = PassFixture::new(core_target(), vec![enterprise_node("pod-0", "5.1.0")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(
        transport.urls(),
        vec!["http://10.1.2.3:18083/api/v5/load_rebalance/availability_check"]
    );
}

#[tokio::test]
async fn test_gated_member_without_credentials_is_not_serving() {
    let pod = ready_core_pod("emqx-core-0", "pod-0");
    let fixture = PassFixture::new(core_target(), vec![enterprise_node("pod-0", "5.0.5")])
        .without_credentials();
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("False"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_pod_of_previous_generation_is_not_serving() {
    let pod = PodBuilder::new("emqx-core-0")
        .uid("pod-0")
        .owned_by(STALE_STS_UID)
        .containers_ready(true)
        .build();
    let fixture = PassFixture::new(core_target(), vec![node("pod-0", "Opensource", "5.8.0")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("False"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_no_active_target_means_nothing_serves() {
    let pod = ready_core_pod("emqx-core-0", "pod-0");
    let fixture = PassFixture::new(
        ActiveTarget::default(),
        vec![node("pod-0", "Opensource", "5.8.0")],
    );
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("False"));
}

#[tokio::test]
async fn test_replicant_pod_owned_by_active_replica_set() {
    let pod = PodBuilder::new("emqx-replicant-abc")
        .uid("pod-r")
        .owned_by(ACTIVE_RS_UID)
        .containers_ready(true)
        .build();
    let target = ActiveTarget::new(
        Some(ACTIVE_STS_UID.to_string()),
        Some(ACTIVE_RS_UID.to_string()),
    );
    let fixture = PassFixture::new(target, vec![node("pod-r", "Opensource", "5.8.0")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(writer.status_of("emqx-replicant-abc").as_deref(), Some("True"));
}

#[tokio::test]
async fn test_repeated_pass_is_idempotent() {
    let pods = vec![
        ready_core_pod("emqx-core-0", "pod-0"),
        ready_core_pod("emqx-core-1", "pod-1"),
    ];
    let fixture = PassFixture::new(
        core_target(),
        vec![
            enterprise_node("pod-0", "5.0.5"),
            node("pod-1", "Opensource", "5.8.0"),
        ],
    );
    let transport = MockTransport::status(200);

    let first = RecordingWriter::new();
    let first_summary = fixture
        .run(&pods, &transport, &first, &CancellationToken::new())
        .await;
    let second = RecordingWriter::new();
    let second_summary = fixture
        .run(&pods, &transport, &second, &CancellationToken::new())
        .await;

    assert_eq!(first_summary, second_summary);
    for pod in ["emqx-core-0", "emqx-core-1"] {
        assert_eq!(first.status_of(pod), second.status_of(pod));
    }
}

#[tokio::test]
async fn test_written_condition_shape_and_transition_time() {
    let earlier = Timestamp::from_second(1_700_000_000).unwrap();
    let mut pod = ready_core_pod("emqx-core-0", "pod-0");
    pod.status
        .as_mut()
        .unwrap()
        .conditions
        .as_mut()
        .unwrap()
        .push(PodCondition {
            type_: POD_ON_SERVING.to_string(),
            status: "True".to_string(),
            last_probe_time: Some(Time(earlier)),
            last_transition_time: Some(Time(earlier)),
            ..Default::default()
        });
    let fixture = PassFixture::new(core_target(), vec![node("pod-0", "Opensource", "5.8.0")]);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    fixture
        .run(&[pod], &transport, &writer, &CancellationToken::new())
        .await;

    let writes = writer.writes();
    assert_eq!(writes.len(), 1);
    let (_, condition) = &writes[0];
    assert_eq!(condition.type_, POD_ON_SERVING);
    assert_eq!(condition.status, "True");
    // Status unchanged, so the transition time is carried over
    assert_eq!(condition.last_transition_time, Some(Time(earlier)));
    assert!(condition.last_probe_time.as_ref().unwrap().0 > earlier);
}

#[tokio::test]
async fn test_write_failure_does_not_stop_other_pods() {
    let pods = vec![
        ready_core_pod("emqx-core-0", "pod-0"),
        ready_core_pod("emqx-core-1", "pod-1"),
        ready_core_pod("emqx-core-2", "pod-2"),
    ];
    let fixture = PassFixture::new(
        core_target(),
        vec![
            node("pod-0", "Opensource", "5.8.0"),
            node("pod-1", "Opensource", "5.8.0"),
            node("pod-2", "Opensource", "5.8.0"),
        ],
    );
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::failing_for(&["emqx-core-1"]);

    let summary = fixture
        .run(&pods, &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(summary.write_failures, 1);
    assert_eq!(summary.serving, 3);
    assert_eq!(writer.status_of("emqx-core-0").as_deref(), Some("True"));
    assert_eq!(writer.status_of("emqx-core-1"), None);
    assert_eq!(writer.status_of("emqx-core-2").as_deref(), Some("True"));
}

#[tokio::test]
async fn test_cancelled_pass_leaves_pods_untouched() {
    let pods = vec![
        ready_core_pod("emqx-core-0", "pod-0"),
        ready_core_pod("emqx-core-1", "pod-1"),
    ];
    let fixture = PassFixture::new(
        core_target(),
        vec![
            enterprise_node("pod-0", "5.0.5"),
            enterprise_node("pod-1", "5.0.5"),
        ],
    );
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = fixture.run(&pods, &transport, &writer, &cancel).await;

    assert_eq!(
        summary,
        PassSummary {
            cancelled: 2,
            ..Default::default()
        }
    );
    assert!(writer.writes().is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_mixed_cluster_summary() {
    let pods = vec![
        ready_core_pod("emqx-core-0", "pod-0"),
        ready_core_pod("emqx-core-1", "pod-1"),
        PodBuilder::new("emqx-core-2")
            .uid("pod-2")
            .owned_by(STALE_STS_UID)
            .containers_ready(true)
            .build(),
        PodBuilder::new("unmanaged").uid("pod-x").build(),
    ];
    let fixture = PassFixture::new(
        core_target(),
        vec![
            enterprise_node("pod-0", "5.0.5"),
            enterprise_node("pod-1", "5.0.2"),
            enterprise_node("pod-2", "5.0.5"),
        ],
    );
    let transport = MockTransport::new(MockResponse::Timeout);
    let writer = RecordingWriter::new();

    let summary = fixture
        .run(&pods, &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(
        summary,
        PassSummary {
            serving: 1,
            not_serving: 1,
            unknown: 1,
            skipped: 1,
            ..Default::default()
        }
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_cancel_during_availability_check_leaves_pod_untouched() {
    let pods = vec![ready_core_pod("emqx-core-0", "pod-0")];
    let target = core_target();
    let nodes = vec![enterprise_node("pod-0", "5.0.5")];
    let credentials = Credentials::new("emqx_operator_controller", "secret");
    let inputs = PassInputs {
        target: &target,
        nodes: &nodes,
        credentials: Some(&credentials),
    };
    let cancel = CancellationToken::new();
    let transport = CancellingTransport::new(cancel.clone());
    let prober = RebalanceProber::with_port(&transport, "18083");
    let writer = RecordingWriter::new();

    // The transport never answers, so this only returns through cancellation
    let summary = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        update_pod_conditions(&pods, &inputs, &prober, &writer, 1, &cancel),
    )
    .await
    .expect("pass should stop once cancelled");

    assert_eq!(
        summary,
        PassSummary {
            cancelled: 1,
            ..Default::default()
        }
    );
    assert_eq!(transport.calls(), 1);
    assert!(writer.writes().is_empty());
}

#[tokio::test]
async fn test_pass_runs_on_spawned_task() {
    let handle = tokio::spawn(async move {
        let pods = vec![
            ready_core_pod("emqx-core-0", "pod-0"),
            ready_core_pod("emqx-core-1", "pod-1"),
            ready_core_pod("emqx-core-2", "pod-2"),
        ];
        let target = core_target();
        let nodes = vec![
            enterprise_node("pod-0", "5.0.5"),
            node("pod-1", "Opensource", "5.8.0"),
            enterprise_node("pod-2", "5.0.2"),
        ];
        let credentials = Credentials::new("emqx_operator_controller", "secret");
        let inputs = PassInputs {
            target: &target,
            nodes: &nodes,
            credentials: Some(&credentials),
        };
        let transport = MockTransport::status(200);
        let prober = RebalanceProber::with_port(&transport, "18083");
        let writer = RecordingWriter::new();
        let cancel = CancellationToken::new();

        let summary = update_pod_conditions(&pods, &inputs, &prober, &writer, 2, &cancel).await;
        (summary, transport.calls(), writer.writes().len())
    });

    let (summary, calls, writes) = handle.await.unwrap();
    assert_eq!(summary.serving, 3);
    assert_eq!(calls, 1);
    assert_eq!(writes, 3);
}

#[tokio::test]
async fn test_concurrency_limit_still_evaluates_every_pod() {
    let pods: Vec<_> = (0..7)
        .map(|i| ready_core_pod(&format!("emqx-core-{i}"), &format!("pod-{i}")))
        .collect();
    let nodes = (0..7)
        .map(|i| enterprise_node(&format!("pod-{i}"), "5.0.5"))
        .collect();
    let fixture = PassFixture::new(core_target(), nodes);
    let transport = MockTransport::status(200);
    let writer = RecordingWriter::new();

    let summary = fixture
        .run(&pods, &transport, &writer, &CancellationToken::new())
        .await;

    assert_eq!(summary.serving, 7);
    assert_eq!(transport.calls(), 7);
    assert_eq!(writer.writes().len(), 7);
}

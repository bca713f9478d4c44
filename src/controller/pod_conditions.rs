//! Pod serving-condition pass.
//!
//! For every managed pod, decide whether it is serving broker traffic and
//! write the verdict as the `OnServing` pod condition. The decision chain is:
//!
//! 1. Pods without a controller reference are not managed and are skipped.
//! 2. Pods not owned by the active update target, or without all containers
//!    ready, are `NotServing`.
//! 3. Pods the broker does not list as a cluster node are `NotServing`.
//! 4. Members on an open-source edition or a version below the rebalance
//!    floor are `Serving`.
//! 5. Otherwise the rebalance availability probe decides.
//!
//! Pods are evaluated concurrently; each pod's verdict is computed first and
//! only then written, so a cancelled pass never leaves a partial write.

use std::future::Future;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use jiff::Timestamp;
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{Credentials, ManagementTransport};
use crate::controller::common::{controller_uid, is_containers_ready, pod_key};
use crate::controller::error::{Error, Result};
use crate::controller::membership::{Membership, classify_membership};
use crate::controller::ownership::{ActiveTarget, is_owned_by_active_target};
use crate::controller::rebalance::RebalanceProber;
use crate::controller::status::{
    POD_ON_SERVING, ServingStatus, condition_patch, find_condition, on_serving_condition,
};
use crate::crd::EmqxNode;

/// Persists a single pod condition.
pub trait PodConditionWriter: Send + Sync {
    /// Merge `condition` into the pod's status, leaving other conditions untouched.
    fn write_condition(
        &self,
        pod: &Pod,
        condition: &PodCondition,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Writes pod conditions through a strategic merge patch on the status subresource.
#[derive(Clone)]
pub struct KubePodConditionWriter {
    client: Client,
}

impl KubePodConditionWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PodConditionWriter for KubePodConditionWriter {
    async fn write_condition(&self, pod: &Pod, condition: &PodCondition) -> Result<()> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::MissingField("metadata.name".to_string()))?;
        let namespace = pod
            .namespace()
            .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let patch = condition_patch(condition)?;
        api.patch_status(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }
}

/// Read-only inputs shared by every pod in a pass.
#[derive(Clone, Copy, Debug)]
pub struct PassInputs<'a> {
    /// Generation currently being rolled out.
    pub target: &'a ActiveTarget,
    /// Broker-reported node records to check membership against.
    pub nodes: &'a [EmqxNode],
    /// Management API credentials, if available.
    pub credentials: Option<&'a Credentials>,
}

/// What happened to one pod during a pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PodOutcome {
    /// Verdict computed and written.
    Written(ServingStatus),
    /// Verdict computed but the write failed.
    WriteFailed(ServingStatus),
    /// Pod has no controller reference; nothing written.
    Skipped,
    /// Pass was cancelled before the pod's write; nothing written.
    Cancelled,
}

/// Counters for a completed pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PassSummary {
    pub serving: usize,
    pub not_serving: usize,
    pub unknown: usize,
    pub skipped: usize,
    pub write_failures: usize,
    pub cancelled: usize,
}

impl PassSummary {
    /// Fold one pod outcome into the summary.
    ///
    /// Verdicts are counted whether or not the write succeeded.
    pub fn record(&mut self, outcome: PodOutcome) {
        let status = match outcome {
            PodOutcome::Written(status) => status,
            PodOutcome::WriteFailed(status) => {
                self.write_failures += 1;
                status
            }
            PodOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
            PodOutcome::Cancelled => {
                self.cancelled += 1;
                return;
            }
        };
        match status {
            ServingStatus::Serving => self.serving += 1,
            ServingStatus::NotServing => self.not_serving += 1,
            ServingStatus::Unknown => self.unknown += 1,
        }
    }

    /// Number of pods a verdict was computed for.
    pub fn evaluated(&self) -> usize {
        self.serving + self.not_serving + self.unknown
    }
}

/// Compute a pod's serving verdict.
///
/// Returns `None` for pods without a controller reference.
pub async fn evaluate_pod<T: ManagementTransport>(
    pod: &Pod,
    inputs: &PassInputs<'_>,
    prober: &RebalanceProber<T>,
) -> Option<ServingStatus> {
    controller_uid(pod)?;

    if !is_owned_by_active_target(pod, inputs.target) || !is_containers_ready(pod) {
        return Some(ServingStatus::NotServing);
    }

    let status = match classify_membership(pod, inputs.nodes) {
        Membership::NotMember => ServingStatus::NotServing,
        Membership::MemberPlain => ServingStatus::Serving,
        Membership::MemberGated => prober.probe_rebalance(pod, inputs.credentials).await,
    };
    Some(status)
}

async fn process_pod<T, W>(
    pod: &Pod,
    inputs: &PassInputs<'_>,
    prober: &RebalanceProber<T>,
    writer: &W,
    cancel: &CancellationToken,
) -> PodOutcome
where
    T: ManagementTransport,
    W: PodConditionWriter,
{
    if cancel.is_cancelled() {
        return PodOutcome::Cancelled;
    }

    let verdict = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        verdict = evaluate_pod(pod, inputs, prober) => Some(verdict),
    };
    let Some(verdict) = verdict else {
        debug!(pod = %pod_key(pod), "Pass cancelled, leaving pod untouched");
        return PodOutcome::Cancelled;
    };
    let Some(status) = verdict else {
        debug!(pod = %pod_key(pod), "Pod has no controller reference, skipping");
        return PodOutcome::Skipped;
    };
    if cancel.is_cancelled() {
        return PodOutcome::Cancelled;
    }

    let previous = find_condition(pod, POD_ON_SERVING);
    let condition = on_serving_condition(status, previous, Timestamp::now());
    match writer.write_condition(pod, &condition).await {
        Ok(()) => {
            debug!(pod = %pod_key(pod), status = %status, "Updated OnServing condition");
            PodOutcome::Written(status)
        }
        Err(e) => {
            warn!(pod = %pod_key(pod), status = %status, error = %e, "Failed to update OnServing condition");
            PodOutcome::WriteFailed(status)
        }
    }
}

/// Evaluate every pod and write its `OnServing` condition.
///
/// At most `concurrency` pods are in flight at once. A failed write is
/// logged and counted but never stops the remaining pods. Once `cancel`
/// fires, pods that have not been written yet are left untouched.
pub async fn update_pod_conditions<T, W>(
    pods: &[Pod],
    inputs: &PassInputs<'_>,
    prober: &RebalanceProber<T>,
    writer: &W,
    concurrency: usize,
    cancel: &CancellationToken,
) -> PassSummary
where
    T: ManagementTransport,
    W: PodConditionWriter,
{
    let concurrency = concurrency.max(1);
    let mut remaining = pods.iter();
    let mut in_flight = FuturesUnordered::new();
    for pod in remaining.by_ref().take(concurrency) {
        in_flight.push(process_pod(pod, inputs, prober, writer, cancel));
    }

    let mut summary = PassSummary::default();
    while let Some(outcome) = in_flight.next().await {
        summary.record(outcome);
        if let Some(pod) = remaining.next() {
            in_flight.push(process_pod(pod, inputs, prober, writer, cancel));
        }
    }
    summary
}

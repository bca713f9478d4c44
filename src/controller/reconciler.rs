//! Reconciliation loop for EMQX.
//!
//! Each reconciliation gathers the pass inputs (active update target, managed
//! pods, management credentials, node records) and runs one serving-condition
//! pass over the pods. Any input that cannot be read fails the whole pass;
//! no pod is written from partial data.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{
    Api, ResourceExt,
    api::ListParams,
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    client::{BOOTSTRAP_USER_KEY, Credentials},
    controller::{
        context::Context,
        error::Error,
        pod_conditions::{KubePodConditionWriter, PassInputs, update_pod_conditions},
        rebalance::RebalanceProber,
        update_target::lookup_active_target,
    },
    crd::{Emqx, label_selector},
};

/// Reconcile an EMQX instance
///
/// Runs one serving-condition pass and requeues for the next periodic resync.
pub async fn reconcile(obj: Arc<Emqx>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

    debug!(name = %name, namespace = %namespace, "Reconciling EMQX");

    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "EMQX is being deleted, skipping pod conditions");
        return Ok(Action::await_change());
    }

    let target = lookup_active_target(&ctx.client, &obj).await?;
    let pods = list_managed_pods(&ctx, &obj, &namespace).await?;
    let credentials = load_credentials(&ctx, &obj, &namespace).await?;
    let nodes = obj.membership_nodes();

    let prober = RebalanceProber::new(ctx.transport.clone(), &obj.spec.config);
    let writer = KubePodConditionWriter::new(ctx.client.clone());
    let inputs = PassInputs {
        target: &target,
        nodes: &nodes,
        credentials: credentials.as_ref(),
    };

    let summary = update_pod_conditions(
        &pods,
        &inputs,
        &prober,
        &writer,
        ctx.config.pod_concurrency,
        &ctx.shutdown,
    )
    .await;

    info!(
        name = %name,
        namespace = %namespace,
        pods = pods.len(),
        serving = summary.serving,
        not_serving = summary.not_serving,
        unknown = summary.unknown,
        skipped = summary.skipped,
        write_failures = summary.write_failures,
        cancelled = summary.cancelled,
        "Updated pod serving conditions"
    );

    if summary.write_failures > 0 {
        ctx.publish_warning_event(
            &obj,
            "PodConditionUpdateFailed",
            "UpdatePodConditions",
            Some(format!(
                "Failed to update the OnServing condition on {} of {} pods",
                summary.write_failures,
                pods.len()
            )),
        )
        .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        health_state.metrics.record_pass(&namespace, &name, &summary);
    }

    if summary.cancelled > 0 {
        // Shutting down; the next leader picks the instance up again
        return Ok(Action::await_change());
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Emqx>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// List the pods of an EMQX instance.
async fn list_managed_pods(ctx: &Context, obj: &Emqx, namespace: &str) -> Result<Vec<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let params = ListParams::default().labels(&label_selector(&obj.instance_labels()));
    let list = api
        .list(&params)
        .await
        .map_err(|e| Error::input("list managed pods", e))?;
    Ok(list.items)
}

/// Load the management API credentials from the bootstrap user Secret.
///
/// A missing Secret or a malformed entry yields `None`; the rebalance probe
/// then reports gated pods as not serving.
async fn load_credentials(
    ctx: &Context,
    obj: &Emqx,
    namespace: &str,
) -> Result<Option<Credentials>, Error> {
    let secret_name = obj.bootstrap_user_secret_name();
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let secret = api
        .get_opt(&secret_name)
        .await
        .map_err(|e| Error::input("read bootstrap user secret", e))?;

    let Some(secret) = secret else {
        debug!(secret = %secret_name, "Bootstrap user secret not found");
        return Ok(None);
    };

    let credentials = credentials_from_secret(&secret);
    if credentials.is_none() {
        warn!(secret = %secret_name, key = BOOTSTRAP_USER_KEY, "Bootstrap user secret is malformed");
    }
    Ok(credentials)
}

/// Extract credentials from a bootstrap user Secret.
pub fn credentials_from_secret(secret: &Secret) -> Option<Credentials> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(BOOTSTRAP_USER_KEY)) {
        let raw = std::str::from_utf8(&bytes.0).ok()?;
        return Credentials::from_bootstrap_user(raw);
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(BOOTSTRAP_USER_KEY))
        .and_then(|raw| Credentials::from_bootstrap_user(raw))
}

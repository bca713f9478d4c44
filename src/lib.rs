//! emqx-operator library crate
//!
//! This module exports the controller, CRD definitions, the management API
//! client, leader election and the health server.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod leader;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{ReplicaSet, StatefulSet};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use crd::Emqx;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream for EMQX objects.
///
/// Status-only updates must trigger a pass since node membership and update
/// revisions live in `.status`, so no generation predicate is applied.
fn create_emqx_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects();
    (reader, stream)
}

/// Run the operator controller (cluster-wide unless the config names a namespace).
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: OperatorConfig,
    shutdown: CancellationToken,
) {
    let namespace = config.watch_namespace.clone();
    run_controller_scoped(client, health_state, config, namespace.as_deref(), shutdown).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide. The controller
/// stops once `shutdown` is cancelled.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: OperatorConfig,
    namespace: Option<&str>,
    shutdown: CancellationToken,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        "Starting controller for EMQX resources (scope: {})",
        scope_msg
    );

    let ctx = match Context::new(client.clone(), health_state.clone(), config, shutdown.clone()) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!(error = %e, "Failed to build management API transport");
            return;
        }
    };

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let emqxes: Api<Emqx> = scoped_api(client.clone(), namespace);
    let stateful_sets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let replica_sets: Api<ReplicaSet> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();
    let (reader, emqx_stream) = create_emqx_stream(emqxes, watcher_config.clone());

    // A rollout creates a new StatefulSet or ReplicaSet; only existence matters
    // here since the update target is read from the EMQX status. Pods are not
    // watched: every pass patches them, which would retrigger the pass.
    Controller::for_stream(emqx_stream, reader)
        .owns_stream(metadata_watcher(stateful_sets, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(replica_sets, watcher_config).touched_objects())
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after deletion when
                    // related watch events trigger reconciliation for a deleted object.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    info!("Controller stopped");
}

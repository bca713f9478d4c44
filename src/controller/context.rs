//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, the management API transport, the
//! shutdown token and the event recorder.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio_util::sync::CancellationToken;

use crate::client::{HttpTransport, RequesterError};
use crate::config::OperatorConfig;
use crate::crd::Emqx;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "emqx-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Operator settings
    pub config: OperatorConfig,
    /// Management API transport, shared across passes
    pub transport: HttpTransport,
    /// Cancelled on shutdown; in-flight passes stop before their next write
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        config: OperatorConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, RequesterError> {
        let transport = HttpTransport::new(config.probe_timeout)?;
        Ok(Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            config,
            transport,
            shutdown,
        })
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a warning event for an EMQX instance
    pub async fn publish_warning_event(
        &self,
        resource: &Emqx,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}

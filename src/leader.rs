//! Leader election over a Kubernetes Lease.
//!
//! Only one operator replica may patch pod conditions at a time. Each replica
//! periodically calls [`LeaderLease::try_acquire_or_renew`]; the holder keeps
//! renewing, everyone else waits for the lease to lapse.

use jiff::Timestamp;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::{debug, info};

use crate::controller::context::FIELD_MANAGER;

/// Leader election lock backed by a named Lease.
pub struct LeaderLease {
    api: Api<Lease>,
    lease_name: String,
    holder_id: String,
    lease_duration_seconds: i32,
}

impl LeaderLease {
    pub fn new(
        client: Client,
        namespace: &str,
        lease_name: &str,
        holder_id: &str,
        lease_duration_seconds: i32,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            holder_id: holder_id.to_string(),
            lease_duration_seconds,
        }
    }

    /// Identity written as the lease holder.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Take the lease if it is free or expired, or renew it if we hold it.
    ///
    /// Returns `Ok(false)` while another holder's lease is still valid, or when
    /// another replica updated the lease between our read and our write.
    pub async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let existing = match self.api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e),
        };

        if let Some(lease) = &existing
            && !can_take(lease, &self.holder_id, Timestamp::now())
        {
            debug!(
                lease = %self.lease_name,
                holder = holder(lease).unwrap_or("unknown"),
                "Lease held by another replica"
            );
            return Ok(false);
        }

        let desired = next_lease(
            existing.as_ref(),
            &self.lease_name,
            &self.holder_id,
            self.lease_duration_seconds,
            Timestamp::now(),
        );
        let taking_over = existing
            .as_ref()
            .and_then(holder)
            .is_none_or(|h| h != self.holder_id);

        match self
            .api
            .patch(
                &self.lease_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await
        {
            Ok(_) => {
                if taking_over {
                    info!(lease = %self.lease_name, holder = %self.holder_id, "Lease acquired");
                }
                Ok(true)
            }
            // Someone else wrote the lease after we read it
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Current holder identity, if any.
fn holder(lease: &Lease) -> Option<&str> {
    lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
}

/// Check if the lease is expired based on renew time and duration.
fn is_lease_expired(lease: &Lease, now: Timestamp) -> bool {
    if let Some(spec) = &lease.spec
        && let (Some(renew_time), Some(duration)) = (&spec.renew_time, spec.lease_duration_seconds)
    {
        let elapsed_secs = now.as_second() - renew_time.0.as_second();
        return elapsed_secs > i64::from(duration);
    }
    true
}

/// Whether `holder_id` may write the lease: it already holds it, or the lease lapsed.
fn can_take(lease: &Lease, holder_id: &str, now: Timestamp) -> bool {
    holder(lease) == Some(holder_id) || is_lease_expired(lease, now)
}

/// Build the lease to apply for `holder_id`.
///
/// The resource version of an existing lease is carried over, so a concurrent
/// writer makes the apply fail with a conflict instead of being overwritten.
fn next_lease(
    existing: Option<&Lease>,
    lease_name: &str,
    holder_id: &str,
    lease_duration_seconds: i32,
    now: Timestamp,
) -> Lease {
    let spec = existing.and_then(|l| l.spec.as_ref());
    let renewing = existing.and_then(holder) == Some(holder_id);
    let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);

    let acquire_time = if renewing {
        spec.and_then(|s| s.acquire_time.clone())
            .unwrap_or(MicroTime(now))
    } else {
        MicroTime(now)
    };
    let lease_transitions = if renewing || existing.is_none() {
        transitions
    } else {
        transitions + 1
    };

    Lease {
        metadata: ObjectMeta {
            name: Some(lease_name.to_string()),
            resource_version: existing.and_then(|l| l.metadata.resource_version.clone()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(holder_id.to_string()),
            lease_duration_seconds: Some(lease_duration_seconds),
            acquire_time: Some(acquire_time),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(lease_transitions),
            ..Default::default()
        }),
    }
}

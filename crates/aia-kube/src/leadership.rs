// # Leader election using Kubernetes Leases
//
// Only the replica holding the coordination Lease runs the engine. The
// lease is written with resourceVersion compare-and-swap: if it changed
// between read and write the API server answers 409 and the attempt counts
// as not acquired.
//
// ## Timing
//
// A held lease is renewed every retry period. Leadership is given up when
// another holder shows up or when no renewal has succeeded within the renew
// deadline, which is shorter than the lease duration so the old leader
// stops before anyone else may take over.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aia_core::traits::LeadershipStatus;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(20);
const RENEW_DEADLINE: Duration = Duration::from_secs(15);
const RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Lease object without a resourceVersion
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
}

/// What to do with the lease as it was last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// We hold it; write a fresh renew time
    Renew,
    /// Held by nobody or expired; take it over
    TakeOver { transitions: i32 },
    /// Someone else holds a live lease
    Wait,
}

/// Decide how to treat an existing lease
///
/// A lease without a holder, renew time or duration is treated as expired.
pub fn lease_decision(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let holder = spec
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|h| !h.is_empty());

    if holder == Some(identity) {
        return LeaseDecision::Renew;
    }

    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let is_expired = match (holder, renew_time, duration_secs) {
        (Some(_), Some(rt), Some(duration)) => {
            now > rt.0 + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    };

    if is_expired {
        LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    } else {
        LeaseDecision::Wait
    }
}

/// Lease-based leadership for one replica
pub struct LeaseLeadership {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
    is_leader: Arc<AtomicBool>,
}

impl LeaseLeadership {
    /// Create an elector with the default timing (20s lease, 15s renew deadline, 5s retry)
    ///
    /// # Parameters
    ///
    /// - `lease_name`: Name of the coordination Lease
    /// - `namespace`: Namespace the Lease lives in
    /// - `identity`: This replica's holder identity, usually the pod name
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_deadline: RENEW_DEADLINE,
            retry_period: RETRY_PERIOD,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Block until leadership is acquired, then return a guard
    ///
    /// The guard keeps renewing the lease in the background. Use
    /// [`LeaderGuard::lost`] to wait for leadership loss.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "Waiting for leadership"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        retry_secs = self.retry_period.as_secs(),
                        "Lease held by another replica"
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        retry_secs = self.retry_period.as_secs(),
                        "Failed to acquire lease, retrying"
                    );
                }
            }
            tokio::time::sleep(self.retry_period).await;
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return self.create_lease(&api, now).await,
            Err(e) => return Err(e.into()),
        };

        match lease_decision(existing.spec.as_ref(), &self.identity, now) {
            LeaseDecision::Renew => self.renew_lease(&api, existing, now).await,
            LeaseDecision::TakeOver { transitions } => {
                self.take_over_lease(&api, existing, now, transitions).await
            }
            LeaseDecision::Wait => Ok(false),
        }
    }

    fn lease_spec(&self, now: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn create_lease(&self, api: &Api<Lease>, now: DateTime<Utc>) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, 0)),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created new lease");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease creation conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        mut lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        if lease.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(self.lease_name.clone()));
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.renew_time = Some(MicroTime(now));
        }

        match api.replace(&self.lease_name, &PostParams::default(), &lease).await {
            Ok(_) => {
                debug!(identity = %self.identity, "Lease renewed");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(identity = %self.identity, "Lease renewal conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        existing: Lease,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool, LeaderElectionError> {
        let resource_version = existing
            .metadata
            .resource_version
            .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;

        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: Some(resource_version),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, transitions + 1)),
        };

        match api.replace(&self.lease_name, &PostParams::default(), &lease).await {
            Ok(_) => {
                info!(
                    identity = %self.identity,
                    transitions = transitions + 1,
                    "Took over expired lease"
                );
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.identity, "Lease takeover conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewed = Instant::now();

        loop {
            tokio::time::sleep(self.retry_period).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewed = Instant::now(),
                Ok(false) => {
                    warn!(identity = %self.identity, "Lease taken by another replica");
                    break;
                }
                Err(e) if last_renewed.elapsed() < self.renew_deadline => {
                    warn!(identity = %self.identity, error = %e, "Lease renewal failed, retrying");
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        deadline_secs = self.renew_deadline.as_secs(),
                        "Lease not renewed within deadline"
                    );
                    break;
                }
            }
        }

        warn!(identity = %self.identity, "Leadership lost");
        self.is_leader.store(false, Ordering::SeqCst);
        let _ = lost_tx.send(());
    }
}

impl LeadershipStatus for LeaseLeadership {
    fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }
}

/// Guard that maintains leadership
///
/// The renewal task is aborted and the leader flag cleared when the guard is
/// dropped.
pub struct LeaderGuard {
    elector: Arc<LeaseLeadership>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
        info!(identity = %self.elector.identity, "Leadership released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn spec(holder: &str, renewed_secs_ago: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(20),
            renew_time: Some(MicroTime(now() - chrono::Duration::seconds(renewed_secs_ago))),
            lease_transitions: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn own_lease_is_renewed() {
        let decision = lease_decision(Some(&spec("pod-a", 100)), "pod-a", now());
        assert_eq!(decision, LeaseDecision::Renew);
    }

    #[test]
    fn live_foreign_lease_is_respected() {
        let decision = lease_decision(Some(&spec("pod-b", 5)), "pod-a", now());
        assert_eq!(decision, LeaseDecision::Wait);

        let decision = lease_decision(Some(&spec("pod-b", 20)), "pod-a", now());
        assert_eq!(decision, LeaseDecision::Wait);
    }

    #[test]
    fn expired_foreign_lease_is_taken_over() {
        let decision = lease_decision(Some(&spec("pod-b", 21)), "pod-a", now());
        assert_eq!(decision, LeaseDecision::TakeOver { transitions: 3 });
    }

    #[test]
    fn incomplete_lease_counts_as_expired() {
        assert_eq!(
            lease_decision(None, "pod-a", now()),
            LeaseDecision::TakeOver { transitions: 0 }
        );

        let mut released = spec("", 1);
        released.holder_identity = None;
        assert_eq!(
            lease_decision(Some(&released), "pod-a", now()),
            LeaseDecision::TakeOver { transitions: 3 }
        );

        let mut no_renew = spec("pod-b", 0);
        no_renew.renew_time = None;
        assert!(matches!(
            lease_decision(Some(&no_renew), "pod-a", now()),
            LeaseDecision::TakeOver { .. }
        ));
    }
}

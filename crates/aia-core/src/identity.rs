//! Cluster identity bootstrap
//!
//! A random per-cluster token stored in a well-known cluster record. Every
//! address this controller allocates is tagged with it, so clusters sharing a
//! cloud account never see each other's addresses in tag searches.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants::IDENTITY_DATA_KEY;
use crate::error::{Error, Result};
use crate::traits::ClusterRecordStore;

/// Attempts made before giving up on a racing create
const BOOTSTRAP_ATTEMPTS: usize = 5;
const BOOTSTRAP_BACKOFF: Duration = Duration::from_millis(10);

/// The cluster-scoped random identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterIdentity(String);

impl ClusterIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the identity record, creating it with a fresh random value if absent.
///
/// Concurrent replicas may race on the create. The loser observes
/// `AlreadyExists`, re-reads, and adopts the winner's value, so all replicas
/// converge on the stored identity.
///
/// # Errors
///
/// Any store failure other than a lost race, an empty stored value, or losing
/// the race on every attempt. All of these are fatal to startup.
pub async fn bootstrap_cluster_identity(
    store: &dyn ClusterRecordStore,
    record_name: &str,
) -> Result<ClusterIdentity> {
    for attempt in 1..=BOOTSTRAP_ATTEMPTS {
        if let Some(data) = store.get_record(record_name).await? {
            return match data.get(IDENTITY_DATA_KEY).filter(|v| !v.is_empty()) {
                Some(value) => {
                    info!(record = record_name, identity = %value, "Using stored cluster identity");
                    Ok(ClusterIdentity::new(value.clone()))
                }
                None => Err(Error::record_store(format!(
                    "cluster identity record {record_name} has no {IDENTITY_DATA_KEY} value"
                ))),
            };
        }

        let value = uuid::Uuid::new_v4().to_string();
        let data = BTreeMap::from([(IDENTITY_DATA_KEY.to_string(), value.clone())]);

        match store.create_record(record_name, data).await {
            Ok(()) => {
                info!(record = record_name, identity = %value, "Created cluster identity");
                return Ok(ClusterIdentity::new(value));
            }
            Err(Error::AlreadyExists(_)) => {
                debug!(record = record_name, attempt, "Lost cluster identity create race, re-reading");
                tokio::time::sleep(BOOTSTRAP_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }

    warn!(record = record_name, "Cluster identity bootstrap kept conflicting");
    Err(Error::record_store(format!(
        "cluster identity record {record_name} conflicted {BOOTSTRAP_ATTEMPTS} times"
    )))
}

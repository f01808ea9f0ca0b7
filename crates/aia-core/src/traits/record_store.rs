// # Cluster Record Store Trait
//
// Cluster-scoped named key/value records. Used to persist the cluster
// identity so that every controller replica and restart sees the same value.

use async_trait::async_trait;
use std::collections::BTreeMap;

/// Trait for cluster record store implementations
///
/// # Thread Safety
///
/// Creation must be atomic across replicas: two concurrent `create_record`
/// calls for the same name may not both succeed.
#[async_trait]
pub trait ClusterRecordStore: Send + Sync {
    /// Read a record
    ///
    /// # Returns
    ///
    /// - `Ok(Some(data))`: The record's key/value data
    /// - `Ok(None)`: No such record
    /// - `Err(Error)`: Storage error
    async fn get_record(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, crate::Error>;

    /// Create a record
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Created
    /// - `Err(Error::AlreadyExists)`: Another writer created it first
    /// - `Err(Error)`: Storage error
    async fn create_record(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<(), crate::Error>;
}

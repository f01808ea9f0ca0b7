// # Node Store Trait
//
// Read and patch access to the cluster's node objects.

use async_trait::async_trait;

use crate::model::{Node, NodePatch};

/// Trait for node store implementations
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node by name
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Node))`: The current snapshot
    /// - `Ok(None)`: The node does not exist
    /// - `Err(Error)`: Cluster API failure
    async fn get_node(&self, name: &str) -> Result<Option<Node>, crate::Error>;

    /// Names of all nodes currently known to the cluster
    async fn list_node_names(&self) -> Result<Vec<String>, crate::Error>;

    /// Apply a partial update
    ///
    /// Only the fields named in `patch` are written.
    async fn patch_node(&self, name: &str, patch: &NodePatch) -> Result<(), crate::Error>;
}

// # Tag Provider Trait
//
// Defines the interface to the cloud tag service. Tags are the only durable
// link between a node and its address, so both reconcilers search through it.

use async_trait::async_trait;

use crate::model::{ResourceTagPage, ResourceTagQuery, TagSearch, TagSearchPage};

/// Trait for cloud tag API implementations
///
/// Paging is driven by the caller; implementations return one page per call.
#[async_trait]
pub trait TagProvider: Send + Sync {
    /// Find resources carrying all tags in `search`
    ///
    /// # Parameters
    ///
    /// - `search`: Tag filters and service scoping
    /// - `offset`: Number of matches to skip
    /// - `limit`: Page size
    ///
    /// # Returns
    ///
    /// One page of resource identifiers together with the total match count
    async fn search_resources(
        &self,
        search: &TagSearch,
        offset: u64,
        limit: u64,
    ) -> Result<TagSearchPage, crate::Error>;

    /// Read selected tag keys of a batch of resources
    async fn describe_resource_tags(
        &self,
        query: &ResourceTagQuery,
        offset: u64,
        limit: u64,
    ) -> Result<ResourceTagPage, crate::Error>;

    /// Register a tag key/value pair
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Created
    /// - `Err(Error::AlreadyExists)`: The pair is already registered
    /// - `Err(Error)`: Any other remote failure
    async fn create_tag(&self, key: &str, value: &str) -> Result<(), crate::Error>;
}

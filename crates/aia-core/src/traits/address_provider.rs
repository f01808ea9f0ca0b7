// # Address Provider Trait
//
// Defines the interface to the cloud network API that owns anycast addresses.
//
// ## Implementations
//
// - Tencent Cloud VPC: `aia-provider-tencent` crate
//
// ## Usage
//
// ```rust,ignore
// use aia_core::AddressProvider;
//
// let ids = provider.describe_addresses(&["eip-0001".to_string()]).await?;
// for address in ids {
//     println!("{} is {}", address.id, address.status);
// }
// ```

use async_trait::async_trait;

use crate::model::{Address, AllocateRequest};

/// Trait for cloud address API implementations
///
/// Implementations translate each call into exactly one remote request (or a
/// bounded number when batching is required) and map the remote error codes
/// onto [`crate::Error`]. They never retry on their own: retries belong to the
/// engine's work queue.
///
/// The network API's uniqueness rules are assumed: an address is bound to at
/// most one instance, and an instance holds at most one address of a type.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Allocate one address
    ///
    /// # Parameters
    ///
    /// - `request`: Name, type, placement and the tags to attach atomically
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The identifier of the new address
    /// - `Err(Error::MissingTag)`: A tag key/value is not registered yet
    /// - `Err(Error)`: Any other remote failure
    async fn allocate_address(&self, request: &AllocateRequest) -> Result<String, crate::Error>;

    /// Describe addresses by identifier
    ///
    /// Unknown identifiers are silently absent from the result.
    async fn describe_addresses(&self, ids: &[String]) -> Result<Vec<Address>, crate::Error>;

    /// Describe addresses currently bound to an instance
    ///
    /// # Parameters
    ///
    /// - `instance_id`: Cloud instance identifier
    /// - `address_types`: Restrict to these types; empty means all types
    async fn describe_instance_addresses(
        &self,
        instance_id: &str,
        address_types: &[String],
    ) -> Result<Vec<Address>, crate::Error>;

    /// Bind an address to an instance
    async fn associate_address(&self, address_id: &str, instance_id: &str)
    -> Result<(), crate::Error>;

    /// Unbind an address from whatever it is bound to
    async fn disassociate_address(&self, address_id: &str) -> Result<(), crate::Error>;

    /// Release addresses back to the cloud account
    ///
    /// An empty slice is a no-op.
    async fn release_addresses(&self, ids: &[String]) -> Result<(), crate::Error>;

    /// Get the provider name for logging
    fn provider_name(&self) -> &'static str;
}

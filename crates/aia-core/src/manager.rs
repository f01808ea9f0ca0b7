//! Address manager
//!
//! Stateless façade over the cloud network API and the tag API. Both
//! reconcilers drive the cloud exclusively through this type, and it is the
//! only place that writes node taints and annotations.
//!
//! ## Address state machine
//!
//! ```text
//!  allocate ──► UNBIND ──associate──► (async) ──► BIND
//!                  ▲                                 │
//!                  └──────── disassociate ◄──────────┘
//!  release (from UNBIND) ──► gone
//! ```
//!
//! Associate and disassociate only *request* a transition. Callers observe
//! the result by describing the address again on a later pass.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{AddressConfig, AddressTypeClass, ControllerConfig};
use crate::constants::{
    ADDRESS_ID_ANNOTATION, ADDRESS_ID_PREFIX, ADDRESS_IP_ANNOTATION, DESCRIBE_ADDRESS_BATCH,
    NO_ADDRESS_TAINT_EFFECT, NO_ADDRESS_TAINT_KEY, NO_ADDRESS_TAINT_VALUE, SEARCH_MAX_ROUNDS,
    SEARCH_PAGE_SIZE, TAG_CLUSTER_ID, TAG_CLUSTER_UUID, TAG_DESCRIBE_BATCH,
    TAG_DESCRIBE_MAX_ROUNDS, TAG_DESCRIBE_PAGE_SIZE, TAG_NODE_INSTANCE_ID, TAG_NODE_NAME,
    TAG_RESOURCE_PREFIX, TAG_SERVICE_TYPE, reasons,
};
use crate::error::{Error, Result};
use crate::identity::ClusterIdentity;
use crate::model::{
    Address, AddressStatus, AllocateRequest, Node, NodePatch, ResourceTagQuery, TagFilter,
    TagSearch, Taint,
};
use crate::traits::{AddressProvider, EventPublisher, NodeStore, TagProvider};

/// Shared entry point to the cloud for both reconcilers
///
/// Safe for concurrent use: every call reads what it needs from the cloud
/// and holds no state between calls.
pub struct AddressManager {
    addresses: Arc<dyn AddressProvider>,
    tags: Arc<dyn TagProvider>,
    nodes: Arc<dyn NodeStore>,
    events: Arc<dyn EventPublisher>,
    identity: ClusterIdentity,
    cluster_id: String,
    region: String,
    settings: AddressConfig,
}

impl AddressManager {
    /// Create a new address manager
    ///
    /// # Parameters
    ///
    /// - `addresses`: Cloud network API
    /// - `tags`: Cloud tag API
    /// - `nodes`: Node store used for taint and annotation patches
    /// - `events`: Warning event sink
    /// - `identity`: Bootstrapped cluster identity
    /// - `config`: Controller configuration (cluster id, region, address settings)
    pub fn new(
        addresses: Arc<dyn AddressProvider>,
        tags: Arc<dyn TagProvider>,
        nodes: Arc<dyn NodeStore>,
        events: Arc<dyn EventPublisher>,
        identity: ClusterIdentity,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            addresses,
            tags,
            nodes,
            events,
            identity,
            cluster_id: config.credential.cluster_id.clone(),
            region: config.region.long_name.clone(),
            settings: config.aia.clone(),
        }
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    pub fn provider_name(&self) -> &'static str {
        self.addresses.provider_name()
    }

    /// Find the address tagged for `node_name` under this cluster's identity.
    ///
    /// Returns the first match. More than one match means an earlier
    /// allocation raced, and is logged but not treated as an error.
    pub async fn lookup(&self, node_name: &str) -> Result<Option<String>> {
        let search = TagSearch {
            filters: vec![
                TagFilter::new(TAG_CLUSTER_UUID, self.identity.as_str()),
                TagFilter::new(TAG_NODE_NAME, node_name),
            ],
            service_type: Some(TAG_SERVICE_TYPE.to_string()),
        };

        let page = self
            .tags
            .search_resources(&search, 0, SEARCH_PAGE_SIZE)
            .await?;

        let mut matches = page
            .resource_ids
            .into_iter()
            .filter(|id| id.starts_with(ADDRESS_ID_PREFIX));

        let first = matches.next();
        match &first {
            Some(id) => {
                let extra = matches.count();
                if extra > 0 {
                    warn!(node = node_name, address_id = %id, extra, "Several addresses tagged for one node, using the first");
                }
                debug!(node = node_name, address_id = %id, "Found tagged address");
            }
            None => debug!(node = node_name, "No tagged address"),
        }
        Ok(first)
    }

    /// Return the node's address, allocating one if none is tagged for it yet.
    ///
    /// When the cloud rejects the allocation, every tag of the request is
    /// pre-registered and the original error is returned, so a later retry
    /// can succeed.
    pub async fn allocate(
        &self,
        node: &Node,
        extra_tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        if let Some(id) = self.lookup(&node.name).await? {
            return Ok(id);
        }

        let instance_id = require_instance_id(node)?;

        // Ownership tags always win over caller-supplied ones
        let mut tags = extra_tags.clone();
        tags.insert(TAG_CLUSTER_UUID.to_string(), self.identity.to_string());
        tags.insert(TAG_CLUSTER_ID.to_string(), self.cluster_id.clone());
        tags.insert(TAG_NODE_NAME.to_string(), node.name.clone());
        tags.insert(TAG_NODE_INSTANCE_ID.to_string(), instance_id.to_string());

        let request = AllocateRequest {
            name: format!("{}-aia", self.cluster_id),
            address_type: self.settings.target_type().to_string(),
            zone: Some(self.settings.anycast_zone.clone()).filter(|z| !z.is_empty()),
            bandwidth: Some(self.settings.bandwidth).filter(|b| *b > 0),
            tags,
        };

        info!(node = %node.name, address_type = %request.address_type, "Allocating address");

        match self.addresses.allocate_address(&request).await {
            Ok(id) => {
                if !id.starts_with(ADDRESS_ID_PREFIX) {
                    return Err(Error::provider(
                        self.provider_name(),
                        format!("allocated id {id} lacks the {ADDRESS_ID_PREFIX} prefix"),
                    ));
                }
                info!(node = %node.name, address_id = %id, "Allocated address");
                Ok(id)
            }
            Err(e) => {
                warn!(node = %node.name, error = %e, "Address allocation failed");
                if !matches!(e, Error::MissingTag(_)) {
                    self.events
                        .publish_warning(
                            node,
                            reasons::FAILED_ALLOCATE,
                            &format!("Failed to allocate anycast ip (will retry): {e}"),
                        )
                        .await;
                }
                // Pre-register even for unrecognised errors in case the
                // cloud changes its error codes
                self.register_tags(node, &request.tags).await;
                Err(e)
            }
        }
    }

    async fn register_tags(&self, node: &Node, tags: &BTreeMap<String, String>) {
        for (key, value) in tags {
            match self.tags.create_tag(key, value).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => {
                    warn!(node = %node.name, tag = %key, error = %e, "Tag pre-registration failed");
                    self.events
                        .publish_warning(
                            node,
                            reasons::FAILED_ALLOCATE,
                            &format!("Failed to create tag {key} (will retry): {e}"),
                        )
                        .await;
                    return;
                }
            }
        }
        debug!(node = %node.name, count = tags.len(), "Tags registered");
    }

    /// Drive the address towards being bound to the node's instance.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Bound to this node; taint removed and annotations written
    /// - `Err(Error::Pending)`: Association requested or still in progress
    /// - `Err(Error::Conflict)`: Bound to a different instance
    /// - `Err(Error::NotFound)`: The address does not exist
    pub async fn associate(&self, node: &Node, address_id: &str) -> Result<()> {
        let instance_id = require_instance_id(node)?;
        let address = self
            .describe_one(address_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("address {address_id}")))?;

        match &address.status {
            AddressStatus::Bound => {
                let holder = address.instance_id.as_deref().unwrap_or("NONE");
                if holder != instance_id {
                    self.events
                        .publish_warning(
                            node,
                            reasons::FAILED_ASSOCIATE,
                            &format!("anycast ip {address_id} has associated to another resource({holder})"),
                        )
                        .await;
                    return Err(Error::conflict(address_id, holder));
                }

                let ip = address
                    .ip
                    .ok_or_else(|| Error::pending(format!("address {address_id} has no ip yet")))?;
                debug!(node = %node.name, address_id, %ip, "Address already bound to node");
                self.untaint_and_annotate(node, address_id, &ip.to_string())
                    .await
            }
            AddressStatus::Unbound => {
                self.addresses
                    .associate_address(address_id, instance_id)
                    .await?;
                info!(node = %node.name, address_id, instance_id, "Associate requested");
                Err(Error::pending(format!(
                    "address {address_id} associate requested, waiting for {}",
                    AddressStatus::Bound
                )))
            }
            AddressStatus::Other(status) => {
                debug!(address_id, status = %status, "Address in transition");
                Err(Error::pending(format!(
                    "address {address_id} is {status}, waiting for it to settle"
                )))
            }
        }
    }

    /// Request that the address be unbound.
    ///
    /// A missing or already unbound address is a success.
    pub async fn disassociate(&self, address_id: &str) -> Result<()> {
        let Some(address) = self.describe_one(address_id).await? else {
            warn!(address_id, "Address not found, nothing to disassociate");
            return Ok(());
        };

        match &address.status {
            AddressStatus::Unbound => {
                debug!(address_id, "Address already unbound");
                Ok(())
            }
            AddressStatus::Bound => match self.addresses.disassociate_address(address_id).await {
                Ok(()) => {
                    info!(
                        address_id,
                        instance_id = ?address.instance_id,
                        "Disassociate requested"
                    );
                    Ok(())
                }
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            },
            AddressStatus::Other(status) => Err(Error::pending(format!(
                "address {address_id} is {status}, waiting for it to settle"
            ))),
        }
    }

    /// Release one address
    pub async fn release(&self, address_id: &str) -> Result<()> {
        self.release_all(&[address_id.to_string()]).await
    }

    /// Release a set of addresses in one call
    pub async fn release_all(&self, address_ids: &[String]) -> Result<()> {
        if address_ids.is_empty() {
            return Ok(());
        }
        info!(addresses = ?address_ids, "Releasing addresses");
        self.addresses.release_addresses(address_ids).await?;
        info!(count = address_ids.len(), "Released addresses");
        Ok(())
    }

    /// Decide whether the node still needs an address of the managed type.
    ///
    /// Inspects the addresses already attached to the node's instance:
    /// a conflicting type taints the node and returns `false`; the managed
    /// type (or an equivalent) untaints and annotates it and returns `false`;
    /// otherwise the node is tainted until an address is bound and `true` is
    /// returned.
    pub async fn needs_address(&self, node: &Node) -> Result<bool> {
        let instance_id = require_instance_id(node)?;
        let attached = self
            .addresses
            .describe_instance_addresses(instance_id, &self.settings.watched_types())
            .await?;

        let target = self.settings.target_type();
        for address in &attached {
            let Some(address_type) = address.address_type.as_deref() else {
                continue;
            };
            let ip = address.ip.map(|ip| ip.to_string()).unwrap_or_default();

            match self.settings.classify(address_type) {
                AddressTypeClass::Conflicting => {
                    info!(
                        node = %node.name,
                        address_id = %address.id,
                        address_type,
                        "Node already has a conflicting address"
                    );
                    self.events
                        .publish_warning(
                            node,
                            reasons::FAILED_ALLOCATE,
                            &format!(
                                "node {} has {address_type} {}/{ip}, cannot allocate {target}",
                                node.name, address.id
                            ),
                        )
                        .await;
                    self.taint_if_necessary(node).await?;
                    return Ok(false);
                }
                AddressTypeClass::Target => {
                    if ip.is_empty() {
                        return Err(Error::pending(format!(
                            "address {} of instance {instance_id} has no ip yet",
                            address.id
                        )));
                    }
                    if let Err(e) = self.untaint_and_annotate(node, &address.id, &ip).await {
                        self.events
                            .publish_warning(
                                node,
                                reasons::FAILED_UNTAINT,
                                &format!("failed to untaint node {}, will retry", node.name),
                            )
                            .await;
                        return Err(e);
                    }
                    info!(node = %node.name, address_id = %address.id, "Node already has its address");
                    return Ok(false);
                }
                AddressTypeClass::Unknown => {
                    warn!(instance_id, address_type, "Ignoring unknown address type");
                }
            }
        }

        self.taint_if_necessary(node).await?;
        Ok(true)
    }

    /// Every address id tagged with this cluster's identity.
    ///
    /// Pages through the tag search until the reported total is reached, an
    /// empty page comes back, or the round limit trips. Tagged resources that
    /// are not addresses are left out.
    pub async fn list_cluster_addresses(&self) -> Result<Vec<String>> {
        let search = TagSearch {
            filters: vec![TagFilter::new(TAG_CLUSTER_UUID, self.identity.as_str())],
            service_type: Some(TAG_SERVICE_TYPE.to_string()),
        };

        let mut ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0u64;
        for round in 0..SEARCH_MAX_ROUNDS {
            let page = self
                .tags
                .search_resources(&search, offset, SEARCH_PAGE_SIZE)
                .await?;
            let fetched = page.resource_ids.len() as u64;
            debug!(round, offset, fetched, total = page.total_count, "Tag search page");

            for id in page.resource_ids {
                if !id.starts_with(ADDRESS_ID_PREFIX) {
                    debug!(resource_id = %id, "Skipping tagged resource that is not an address");
                    continue;
                }
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }

            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                return Ok(ids);
            }
        }

        warn!(
            rounds = SEARCH_MAX_ROUNDS,
            collected = ids.len(),
            "Tag search hit the round limit"
        );
        Ok(ids)
    }

    /// Node-name tag of each address, for addresses that carry one
    pub async fn node_names_of(&self, address_ids: &[String]) -> Result<BTreeMap<String, String>> {
        let mut owners = BTreeMap::new();

        for batch in address_ids.chunks(TAG_DESCRIBE_BATCH) {
            let query = ResourceTagQuery {
                service_type: TAG_SERVICE_TYPE.to_string(),
                resource_prefix: TAG_RESOURCE_PREFIX.to_string(),
                region: self.region.clone(),
                resource_ids: batch.to_vec(),
                tag_keys: vec![TAG_CLUSTER_UUID.to_string(), TAG_NODE_NAME.to_string()],
            };

            let mut offset = 0u64;
            for _ in 0..TAG_DESCRIBE_MAX_ROUNDS {
                let page = self
                    .tags
                    .describe_resource_tags(&query, offset, TAG_DESCRIBE_PAGE_SIZE)
                    .await?;
                let fetched = page.rows.len() as u64;

                for row in page.rows {
                    match row.tags.get(TAG_NODE_NAME) {
                        Some(name) => {
                            owners.insert(row.resource_id, name.clone());
                        }
                        None => debug!(address_id = %row.resource_id, "Address has no node-name tag"),
                    }
                }

                offset += fetched;
                if fetched == 0 || offset >= page.total_count {
                    break;
                }
            }
        }

        Ok(owners)
    }

    /// Describe addresses in provider-sized batches
    pub async fn describe(&self, address_ids: &[String]) -> Result<Vec<Address>> {
        let mut described = Vec::with_capacity(address_ids.len());
        for batch in address_ids.chunks(DESCRIBE_ADDRESS_BATCH) {
            described.extend(self.addresses.describe_addresses(batch).await?);
        }
        Ok(described)
    }

    async fn describe_one(&self, address_id: &str) -> Result<Option<Address>> {
        let described = self
            .addresses
            .describe_addresses(&[address_id.to_string()])
            .await?;
        Ok(described.into_iter().find(|a| a.id == address_id))
    }

    /// Taint the node and drop any address annotations left behind.
    async fn taint_if_necessary(&self, node: &Node) -> Result<()> {
        let tainted = node.has_taint(NO_ADDRESS_TAINT_KEY);
        let stale: Vec<&str> = [ADDRESS_ID_ANNOTATION, ADDRESS_IP_ANNOTATION]
            .into_iter()
            .filter(|key| node.annotations.contains_key(*key))
            .collect();
        if tainted && stale.is_empty() {
            return Ok(());
        }

        let mut patch = NodePatch::default();
        if !tainted {
            let mut taints = node.taints.clone();
            taints.push(Taint::new(
                NO_ADDRESS_TAINT_KEY,
                NO_ADDRESS_TAINT_VALUE,
                NO_ADDRESS_TAINT_EFFECT,
            ));
            patch.taints = Some(taints);
        }
        for key in &stale {
            patch.annotations.insert(key.to_string(), None);
        }

        self.nodes.patch_node(&node.name, &patch).await?;
        info!(node = %node.name, cleared = ?stale, "Tainted node without address");
        Ok(())
    }

    async fn untaint_and_annotate(&self, node: &Node, address_id: &str, ip: &str) -> Result<()> {
        let tainted = node.has_taint(NO_ADDRESS_TAINT_KEY);
        let annotated = node.has_address_annotations(address_id, ip);
        if !tainted && annotated {
            return Ok(());
        }

        let mut patch = NodePatch::default();
        if tainted {
            patch.taints = Some(
                node.taints
                    .iter()
                    .filter(|t| t.key != NO_ADDRESS_TAINT_KEY)
                    .cloned()
                    .collect(),
            );
        }
        if !annotated {
            patch
                .annotations
                .insert(ADDRESS_ID_ANNOTATION.to_string(), Some(address_id.to_string()));
            patch
                .annotations
                .insert(ADDRESS_IP_ANNOTATION.to_string(), Some(ip.to_string()));
        }

        self.nodes.patch_node(&node.name, &patch).await?;
        info!(node = %node.name, address_id, ip, "Node untainted and annotated");
        Ok(())
    }
}

fn require_instance_id(node: &Node) -> Result<&str> {
    node.instance_id()
        .ok_or_else(|| Error::pending(format!("node {} has no instance id yet", node.name)))
}

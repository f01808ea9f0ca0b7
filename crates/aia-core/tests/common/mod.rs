//! Test doubles and common utilities for contract tests
//!
//! In-memory stand-ins for the cloud, the node store and the event sink,
//! sharing state through `Arc`s so tests can inspect what the code under
//! test did.

#![allow(dead_code)]

use aia_core::constants::{
    DESCRIBE_ADDRESS_BATCH, SEARCH_PAGE_SIZE, TAG_DESCRIBE_BATCH, TAG_DESCRIBE_PAGE_SIZE,
};
use aia_core::error::{Error, Result};
use aia_core::model::{
    Address, AddressStatus, AllocateRequest, Node, NodeEvent, NodePatch, ResourceTagPage,
    ResourceTagQuery, ResourceTags, TagSearch, TagSearchPage,
};
use aia_core::traits::{
    AddressProvider, AlwaysLeader, EventPublisher, LeaderLatch, NodeEventSource, NodeStore,
    TagProvider,
};
use aia_core::{
    AddressManager, ClusterIdentity, ControllerConfig, ForwardReconciler, GarbageCollector,
};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub const CLUSTER_ID: &str = "cls-test";
pub const CLUSTER_UUID: &str = "uuid-test";
pub const REGION: &str = "ap-guangzhou";

const BINDING: &str = "BINDING";
const UNBINDING: &str = "UNBINDING";

#[derive(Default)]
struct CloudState {
    addresses: BTreeMap<String, Address>,
    next_id: usize,
    registered_tags: HashSet<(String, String)>,
    released: Vec<String>,
}

/// Fake cloud implementing both the network and the tag API.
///
/// Associate and disassociate move an address into a transient state;
/// [`FakeCloud::settle`] completes the transition, as the provider would
/// asynchronously. With `auto_settle` the transition completes at once.
/// Requests larger than the provider's batch and page limits are rejected.
#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
    require_registered_tags: Arc<Mutex<bool>>,
    allocate_error: Arc<Mutex<Option<String>>>,
    auto_settle: Arc<Mutex<bool>>,
    search_total_override: Arc<Mutex<Option<u64>>>,
    pub allocate_calls: Arc<AtomicUsize>,
    pub associate_calls: Arc<AtomicUsize>,
    pub disassociate_calls: Arc<AtomicUsize>,
    pub release_calls: Arc<AtomicUsize>,
    pub create_tag_calls: Arc<AtomicUsize>,
    pub search_calls: Arc<AtomicUsize>,
    pub describe_calls: Arc<AtomicUsize>,
    pub tag_describe_calls: Arc<AtomicUsize>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject allocations whose tags were never registered
    pub fn require_registered_tags(&self, on: bool) {
        *self.require_registered_tags.lock().unwrap() = on;
    }

    /// Fail every allocation with a provider error
    pub fn fail_allocations(&self, message: Option<&str>) {
        *self.allocate_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn set_auto_settle(&self, on: bool) {
        *self.auto_settle.lock().unwrap() = on;
    }

    /// Report this total on every tag search page
    pub fn override_search_total(&self, total: Option<u64>) {
        *self.search_total_override.lock().unwrap() = total;
    }

    /// Seed an address directly
    pub fn insert_address(&self, address: Address) {
        self.state
            .lock()
            .unwrap()
            .addresses
            .insert(address.id.clone(), address);
    }

    /// Seed an address tagged for `node` under the test cluster identity
    pub fn insert_tagged(&self, id: &str, node: &str, instance: &str, status: AddressStatus) {
        let bound_to = matches!(status, AddressStatus::Bound).then(|| instance.to_string());
        self.insert_address(Address {
            id: id.to_string(),
            ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 200))),
            status,
            address_type: Some("AnycastEIP".to_string()),
            instance_id: bound_to,
            tags: ownership_tags(node, instance),
        });
    }

    pub fn address(&self, id: &str) -> Option<Address> {
        self.state.lock().unwrap().addresses.get(id).cloned()
    }

    pub fn address_count(&self) -> usize {
        self.state.lock().unwrap().addresses.len()
    }

    pub fn released(&self) -> Vec<String> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn is_tag_registered(&self, key: &str, value: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .registered_tags
            .contains(&(key.to_string(), value.to_string()))
    }

    /// Force an address into a state, bound to `instance` when bound
    pub fn set_status(&self, id: &str, status: AddressStatus, instance: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if let Some(address) = state.addresses.get_mut(id) {
            address.status = status;
            address.instance_id = instance.map(str::to_string);
        }
    }

    /// Complete every pending bind/unbind
    pub fn settle(&self) {
        let mut state = self.state.lock().unwrap();
        for address in state.addresses.values_mut() {
            settle_one(address);
        }
    }

    fn maybe_settle(&self, address: &mut Address) {
        if *self.auto_settle.lock().unwrap() {
            settle_one(address);
        }
    }
}

fn settle_one(address: &mut Address) {
    match &address.status {
        AddressStatus::Other(s) if s == BINDING => address.status = AddressStatus::Bound,
        AddressStatus::Other(s) if s == UNBINDING => {
            address.status = AddressStatus::Unbound;
            address.instance_id = None;
        }
        _ => {}
    }
}

/// The four ownership tags the manager attaches
pub fn ownership_tags(node: &str, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("aia-official-cluster-uuid".to_string(), CLUSTER_UUID.to_string()),
        ("aia-official-cluster-id".to_string(), CLUSTER_ID.to_string()),
        ("aia-node-name".to_string(), node.to_string()),
        ("aia-node-ins-id".to_string(), instance.to_string()),
    ])
}

fn page<T: Clone>(items: &[T], offset: u64, limit: u64) -> Vec<T> {
    items
        .iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect()
}

#[async_trait::async_trait]
impl AddressProvider for FakeCloud {
    async fn allocate_address(&self, request: &AllocateRequest) -> Result<String> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.allocate_error.lock().unwrap().clone() {
            return Err(Error::provider("fake", message));
        }

        let mut state = self.state.lock().unwrap();
        if *self.require_registered_tags.lock().unwrap() {
            if let Some((k, _)) = request
                .tags
                .iter()
                .find(|(k, v)| !state.registered_tags.contains(&(k.to_string(), v.to_string())))
            {
                return Err(Error::missing_tag(format!("InvalidTag.NotExisted: {k}")));
            }
        }

        state.next_id += 1;
        let n = state.next_id;
        let id = format!("eip-{n:03}");
        state.addresses.insert(
            id.clone(),
            Address {
                id: id.clone(),
                ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, n as u8))),
                status: AddressStatus::Unbound,
                address_type: Some(request.address_type.clone()),
                instance_id: None,
                tags: request.tags.clone(),
            },
        );
        Ok(id)
    }

    async fn describe_addresses(&self, ids: &[String]) -> Result<Vec<Address>> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if ids.len() > DESCRIBE_ADDRESS_BATCH {
            return Err(Error::invalid_input(format!(
                "describe of {} addresses exceeds {DESCRIBE_ADDRESS_BATCH}",
                ids.len()
            )));
        }
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.addresses.get(id).cloned())
            .collect())
    }

    async fn describe_instance_addresses(
        &self,
        instance_id: &str,
        address_types: &[String],
    ) -> Result<Vec<Address>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .addresses
            .values()
            .filter(|a| a.status == AddressStatus::Bound)
            .filter(|a| a.instance_id.as_deref() == Some(instance_id))
            .filter(|a| {
                address_types.is_empty()
                    || a.address_type
                        .as_ref()
                        .is_some_and(|t| address_types.contains(t))
            })
            .cloned()
            .collect())
    }

    async fn associate_address(&self, address_id: &str, instance_id: &str) -> Result<()> {
        self.associate_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let address = state
            .addresses
            .get_mut(address_id)
            .ok_or_else(|| Error::not_found(address_id.to_string()))?;
        if address.status != AddressStatus::Unbound {
            return Err(Error::provider("fake", format!("{address_id} is not unbound")));
        }
        address.status = AddressStatus::Other(BINDING.to_string());
        address.instance_id = Some(instance_id.to_string());
        self.maybe_settle(address);
        Ok(())
    }

    async fn disassociate_address(&self, address_id: &str) -> Result<()> {
        self.disassociate_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let address = state
            .addresses
            .get_mut(address_id)
            .ok_or_else(|| Error::not_found(address_id.to_string()))?;
        if address.status != AddressStatus::Bound {
            return Err(Error::provider("fake", format!("{address_id} is not bound")));
        }
        address.status = AddressStatus::Other(UNBINDING.to_string());
        self.maybe_settle(address);
        Ok(())
    }

    async fn release_addresses(&self, ids: &[String]) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        for id in ids {
            match state.addresses.get(id) {
                None => return Err(Error::not_found(id.clone())),
                Some(a) if a.status != AddressStatus::Unbound => {
                    return Err(Error::provider("fake", format!("{id} is {}", a.status)));
                }
                Some(_) => {}
            }
        }
        for id in ids {
            state.addresses.remove(id);
            state.released.push(id.clone());
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[async_trait::async_trait]
impl TagProvider for FakeCloud {
    async fn search_resources(
        &self,
        search: &TagSearch,
        offset: u64,
        limit: u64,
    ) -> Result<TagSearchPage> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if limit > SEARCH_PAGE_SIZE {
            return Err(Error::invalid_input(format!("search limit {limit} too large")));
        }
        let state = self.state.lock().unwrap();
        let matching: Vec<String> = state
            .addresses
            .values()
            .filter(|a| {
                search.filters.iter().all(|f| {
                    a.tags
                        .get(&f.key)
                        .is_some_and(|v| f.values.contains(v))
                })
            })
            .map(|a| a.id.clone())
            .collect();

        let total = self
            .search_total_override
            .lock()
            .unwrap()
            .unwrap_or(matching.len() as u64);
        Ok(TagSearchPage {
            total_count: total,
            resource_ids: page(&matching, offset, limit),
        })
    }

    async fn describe_resource_tags(
        &self,
        query: &ResourceTagQuery,
        offset: u64,
        limit: u64,
    ) -> Result<ResourceTagPage> {
        self.tag_describe_calls.fetch_add(1, Ordering::SeqCst);
        if query.resource_ids.len() > TAG_DESCRIBE_BATCH || limit > TAG_DESCRIBE_PAGE_SIZE {
            return Err(Error::invalid_input(format!(
                "tag describe of {} resources with limit {limit} exceeds provider limits",
                query.resource_ids.len()
            )));
        }
        let state = self.state.lock().unwrap();
        let rows: Vec<ResourceTags> = query
            .resource_ids
            .iter()
            .filter_map(|id| state.addresses.get(id))
            .map(|a| ResourceTags {
                resource_id: a.id.clone(),
                tags: a
                    .tags
                    .iter()
                    .filter(|(k, _)| query.tag_keys.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect();

        Ok(ResourceTagPage {
            total_count: rows.len() as u64,
            rows: page(&rows, offset, limit),
        })
    }

    async fn create_tag(&self, key: &str, value: &str) -> Result<()> {
        self.create_tag_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state
            .registered_tags
            .insert((key.to_string(), value.to_string()))
        {
            Ok(())
        } else {
            Err(Error::already_exists(format!("TagDuplicate: {key}")))
        }
    }
}

/// Fake node store applying merge-patch semantics
#[derive(Clone, Default)]
pub struct FakeNodeStore {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    patches: Arc<Mutex<Vec<(String, NodePatch)>>>,
    fail_patches: Arc<Mutex<bool>>,
}

impl FakeNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: Node) {
        self.nodes.lock().unwrap().insert(node.name.clone(), node);
    }

    pub fn remove(&self, name: &str) {
        self.nodes.lock().unwrap().remove(name);
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(name).cloned()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    pub fn fail_patches(&self, on: bool) {
        *self.fail_patches.lock().unwrap() = on;
    }
}

#[async_trait::async_trait]
impl NodeStore for FakeNodeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.node(name))
    }

    async fn list_node_names(&self) -> Result<Vec<String>> {
        Ok(self.nodes.lock().unwrap().keys().cloned().collect())
    }

    async fn patch_node(&self, name: &str, patch: &NodePatch) -> Result<()> {
        if *self.fail_patches.lock().unwrap() {
            return Err(Error::node_store("patch rejected"));
        }
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("node {name}")))?;

        if let Some(taints) = &patch.taints {
            node.taints = taints.clone();
        }
        for (key, value) in &patch.annotations {
            match value {
                Some(v) => {
                    node.annotations.insert(key.clone(), v.clone());
                }
                None => {
                    node.annotations.remove(key);
                }
            }
        }

        self.patches
            .lock()
            .unwrap()
            .push((name.to_string(), patch.clone()));
        Ok(())
    }
}

/// Event publisher that records every warning
#[derive(Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// (node, reason, note) triples in publish order
    pub fn events(&self) -> Vec<(String, String, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, r, _)| r).collect()
    }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_warning(&self, node: &Node, reason: &str, note: &str) {
        self.events.lock().unwrap().push((
            node.name.clone(),
            reason.to_string(),
            note.to_string(),
        ));
    }
}

/// A node source whose events are pushed by the test
pub struct ControlledNodeSource {
    engine_rx: Mutex<Option<mpsc::UnboundedReceiver<NodeEvent>>>,
}

impl ControlledNodeSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                engine_rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl NodeEventSource for ControlledNodeSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>> {
        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

/// Label every test node must carry to be eligible
pub const ELIGIBLE_LABEL: (&str, &str) = ("tke.cloud.tencent.com/need-aia-ip", "true");

pub fn eligible_node(name: &str, instance: &str) -> Node {
    Node::new(name)
        .with_label(ELIGIBLE_LABEL.0, ELIGIBLE_LABEL.1)
        .with_instance_id(instance)
}

pub fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.region.long_name = REGION.to_string();
    config.credential.cluster_id = CLUSTER_ID.to_string();
    config.credential.secret_id = "id".to_string();
    config.credential.secret_key = "key".to_string();
    config
        .node
        .labels
        .insert(ELIGIBLE_LABEL.0.to_string(), ELIGIBLE_LABEL.1.to_string());
    config.engine.release_grace_secs = 10;
    config
}

/// Wires the core components against shared fakes
pub struct Harness {
    pub cloud: FakeCloud,
    pub nodes: FakeNodeStore,
    pub events: RecordingEventPublisher,
    pub latch: LeaderLatch,
    pub config: ControllerConfig,
    pub manager: Arc<AddressManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let cloud = FakeCloud::new();
        let nodes = FakeNodeStore::new();
        let events = RecordingEventPublisher::new();
        let manager = Arc::new(AddressManager::new(
            Arc::new(cloud.clone()),
            Arc::new(cloud.clone()),
            Arc::new(nodes.clone()),
            Arc::new(events.clone()),
            ClusterIdentity::new(CLUSTER_UUID),
            &config,
        ));

        Self {
            cloud,
            nodes,
            events,
            latch: LeaderLatch::new(),
            config,
            manager,
        }
    }

    pub fn reconciler(&self) -> ForwardReconciler {
        ForwardReconciler::new(
            Arc::clone(&self.manager),
            Arc::new(self.nodes.clone()),
            Arc::new(self.latch.clone()),
            self.config.aia.tags.clone(),
        )
    }

    pub fn collector(&self) -> GarbageCollector {
        GarbageCollector::new(
            Arc::clone(&self.manager),
            Arc::new(self.nodes.clone()),
            Arc::new(AlwaysLeader),
            &self.config.engine,
        )
    }

    pub fn collector_with_latch(&self) -> GarbageCollector {
        GarbageCollector::new(
            Arc::clone(&self.manager),
            Arc::new(self.nodes.clone()),
            Arc::new(self.latch.clone()),
            &self.config.engine,
        )
    }
}

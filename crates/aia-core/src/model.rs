//! Domain model
//!
//! Plain data types exchanged between the reconcilers and the trait seams.
//! Nothing here performs I/O.

use crate::constants::{
    ADDRESS_ID_ANNOTATION, ADDRESS_IP_ANNOTATION, ADDRESS_STATUS_BOUND, ADDRESS_STATUS_UNBOUND,
    NODE_INSTANCE_ID_LABEL,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// A scheduling exclusion marker on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            effect: effect.into(),
        }
    }
}

/// Lifecycle phase reported by the cluster control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePhase {
    Pending,
    Running,
    Terminated,
    Unknown(String),
}

impl NodePhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Terminated" => Self::Terminated,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Snapshot of a cluster node, reduced to what the controller reads or writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Stable unique name
    pub name: String,
    /// Object uid, used to attach events
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub phase: Option<NodePhase>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Cloud instance id from the registration label, if set and non-empty
    pub fn instance_id(&self) -> Option<&str> {
        self.labels
            .get(NODE_INSTANCE_ID_LABEL)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn has_taint(&self, key: &str) -> bool {
        self.taints.iter().any(|t| t.key == key)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Some(NodePhase::Terminated))
    }

    /// Whether both address annotations are present with exactly these values
    pub fn has_address_annotations(&self, address_id: &str, ip: &str) -> bool {
        self.annotations.get(ADDRESS_ID_ANNOTATION).map(String::as_str) == Some(address_id)
            && self.annotations.get(ADDRESS_IP_ANNOTATION).map(String::as_str) == Some(ip)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_instance_id(self, instance_id: impl Into<String>) -> Self {
        self.with_label(NODE_INSTANCE_ID_LABEL, instance_id)
    }
}

/// A best-effort partial update of a node.
///
/// Only the named fields are written. The taint list is replaced as a whole
/// when present because merge patches cannot address list elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePatch {
    pub taints: Option<Vec<Taint>>,
    /// `Some` sets the annotation, `None` removes it
    pub annotations: BTreeMap<String, Option<String>>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.taints.is_none() && self.annotations.is_empty()
    }

    /// Render as an RFC 7386 JSON merge patch
    pub fn to_merge_patch(&self) -> serde_json::Value {
        let mut patch = serde_json::Map::new();

        if !self.annotations.is_empty() {
            let annotations: serde_json::Map<String, serde_json::Value> = self
                .annotations
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Some(v) => serde_json::Value::String(v.clone()),
                        None => serde_json::Value::Null,
                    };
                    (k.clone(), value)
                })
                .collect();
            patch.insert(
                "metadata".to_string(),
                serde_json::json!({ "annotations": annotations }),
            );
        }

        if let Some(taints) = &self.taints {
            patch.insert("spec".to_string(), serde_json::json!({ "taints": taints }));
        }

        serde_json::Value::Object(patch)
    }
}

/// Binding state of an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressStatus {
    Bound,
    Unbound,
    /// Transient provider states, not yet actionable
    Other(String),
}

impl AddressStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            ADDRESS_STATUS_BOUND => Self::Bound,
            ADDRESS_STATUS_UNBOUND => Self::Unbound,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Bound => ADDRESS_STATUS_BOUND,
            Self::Unbound => ADDRESS_STATUS_UNBOUND,
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for AddressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An address as described by the cloud network API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub id: String,
    pub ip: Option<IpAddr>,
    pub status: AddressStatus,
    pub address_type: Option<String>,
    pub instance_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl Address {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Parameters for allocating one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocateRequest {
    pub name: String,
    pub address_type: String,
    pub zone: Option<String>,
    pub bandwidth: Option<i64>,
    pub tags: BTreeMap<String, String>,
}

/// One tag key with the accepted values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub values: Vec<String>,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: vec![value.into()],
        }
    }
}

/// Search for resources carrying all of `filters`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSearch {
    pub filters: Vec<TagFilter>,
    pub service_type: Option<String>,
}

/// One page of a tag search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSearchPage {
    pub total_count: u64,
    pub resource_ids: Vec<String>,
}

/// Look up selected tag keys of a batch of resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTagQuery {
    pub service_type: String,
    pub resource_prefix: String,
    pub region: String,
    pub resource_ids: Vec<String>,
    pub tag_keys: Vec<String>,
}

/// Tags of one resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTags {
    pub resource_id: String,
    pub tags: BTreeMap<String, String>,
}

/// One page of a resource tag lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTagPage {
    pub total_count: u64,
    pub rows: Vec<ResourceTags>,
}

/// A node notification from the cluster.
///
/// Update snapshots are optional: a side that could not be decoded is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Created(Node),
    Updated {
        old: Option<Node>,
        new: Option<Node>,
    },
    Deleted(Node),
}

impl NodeEvent {
    /// Name of the node this event concerns
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Created(node) | Self::Deleted(node) => Some(&node.name),
            Self::Updated { new: Some(node), .. } | Self::Updated { old: Some(node), .. } => {
                Some(&node.name)
            }
            Self::Updated { .. } => None,
        }
    }
}

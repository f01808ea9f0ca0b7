//! Configuration types for the anycast IP controller
//!
//! The controller reads one YAML values file. Credentials and a few engine
//! knobs can be overridden from the environment after the file is loaded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    ADDRESS_TYPE_ANYCAST, ADDRESS_TYPE_COMMON, ADDRESS_TYPE_HIGH_QUALITY, ADDRESS_TYPE_WAN_IP,
};
use crate::error::{Error, Result};

/// Required prefix of every cluster id
pub const CLUSTER_ID_PREFIX: &str = "cls-";

/// Main controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Leader election settings
    #[serde(default)]
    pub controller: LockConfig,

    /// Cloud region the addresses live in
    #[serde(default)]
    pub region: RegionConfig,

    /// Cloud credentials and cluster id
    #[serde(default)]
    pub credential: CredentialConfig,

    /// Address allocation settings
    #[serde(default)]
    pub aia: AddressConfig,

    /// Node eligibility settings
    #[serde(default)]
    pub node: NodeConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ControllerConfig {
    /// Parse a YAML values document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid YAML: {e}")))
    }

    /// Load a YAML values file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    /// Apply environment overrides.
    ///
    /// `lookup` returns the value of a variable, if set. Unset and empty
    /// variables leave the file value untouched.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("AIA_CLUSTER_ID") {
            self.credential.cluster_id = v;
        }
        if let Some(v) = get("AIA_APP_ID") {
            self.credential.app_id = v;
        }
        if let Some(v) = get("AIA_SECRET_ID") {
            self.credential.secret_id = v;
        }
        if let Some(v) = get("AIA_SECRET_KEY") {
            self.credential.secret_key = v;
        }
        if let Some(v) = get("AIA_MAX_CONCURRENT_RECONCILES") {
            self.engine.max_concurrent_reconciles = v.parse().map_err(|_| {
                Error::config(format!("AIA_MAX_CONCURRENT_RECONCILES is not a number: {v}"))
            })?;
        }
        if let Some(v) = get("AIA_ENABLE_REVERSE_RECONCILE") {
            self.engine.enable_reverse_reconcile = v.parse().map_err(|_| {
                Error::config(format!("AIA_ENABLE_REVERSE_RECONCILE is not a bool: {v}"))
            })?;
        }
        if let Some(v) = get("AIA_REVERSE_RECONCILE_INTERVAL_SECS") {
            self.engine.reverse_reconcile_interval_secs = v.parse().map_err(|_| {
                Error::config(format!(
                    "AIA_REVERSE_RECONCILE_INTERVAL_SECS is not a number: {v}"
                ))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.credential.validate()?;

        if self.region.long_name.is_empty() {
            return Err(Error::config("region.longName cannot be empty"));
        }
        if self.aia.target_type().is_empty() {
            return Err(Error::config("aia.addressType cannot be empty"));
        }

        self.engine.validate()
    }
}

/// Leader election lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockConfig {
    /// Name of the coordination lease
    #[serde(default = "default_resource_lock_name")]
    pub resource_lock_name: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            resource_lock_name: default_resource_lock_name(),
        }
    }
}

fn default_resource_lock_name() -> String {
    "tke-aia-ip-controller".to_string()
}

/// Cloud region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfig {
    /// Short region code (e.g. "gz")
    #[serde(default)]
    pub short_name: String,
    /// API region name (e.g. "ap-guangzhou")
    #[serde(default)]
    pub long_name: String,
}

/// Cloud credentials
///
/// `Debug` output never includes the secret key.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
    #[serde(rename = "appID", default)]
    pub app_id: String,
    #[serde(rename = "secretID", default)]
    pub secret_id: String,
    #[serde(rename = "secretKey", default)]
    pub secret_key: String,
}

impl CredentialConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cluster_id.starts_with(CLUSTER_ID_PREFIX) {
            return Err(Error::config(format!(
                "invalid cluster id '{}', must start with {CLUSTER_ID_PREFIX}",
                self.cluster_id
            )));
        }
        if self.secret_id.is_empty() || self.secret_key.is_empty() {
            return Err(Error::config("secret id and secret key are required"));
        }
        Ok(())
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("cluster_id", &self.cluster_id)
            .field("app_id", &self.app_id)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"***")
            .finish()
    }
}

/// How an address type already attached to a node is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressTypeClass {
    /// The managed type or one declared equivalent to it
    Target,
    /// Blocks the node from receiving the managed type
    Conflicting,
    /// Neither; logged and skipped
    Unknown,
}

/// Address allocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressConfig {
    /// Extra tags attached to every allocated address
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Outbound bandwidth cap in Mbps; 0 leaves the provider default
    #[serde(default)]
    pub bandwidth: i64,

    /// Anycast publishing zone; empty leaves the provider default
    #[serde(default)]
    pub anycast_zone: String,

    /// Address type managed end to end
    #[serde(default = "default_address_type")]
    pub address_type: String,

    /// Types that satisfy the node as if they were `address_type`
    #[serde(default)]
    pub equivalent_address_types: Vec<String>,

    /// Types that make a node ineligible, unless target or equivalent
    #[serde(default = "default_conflicting_address_types")]
    pub conflicting_address_types: Vec<String>,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            tags: BTreeMap::new(),
            bandwidth: 0,
            anycast_zone: String::new(),
            address_type: default_address_type(),
            equivalent_address_types: Vec::new(),
            conflicting_address_types: default_conflicting_address_types(),
        }
    }
}

impl AddressConfig {
    /// The managed address type
    pub fn target_type(&self) -> &str {
        &self.address_type
    }

    /// Classify an address type found on a node's instance
    pub fn classify(&self, address_type: &str) -> AddressTypeClass {
        if address_type == self.address_type
            || self.equivalent_address_types.iter().any(|t| t == address_type)
        {
            AddressTypeClass::Target
        } else if self.conflicting_address_types.iter().any(|t| t == address_type) {
            AddressTypeClass::Conflicting
        } else {
            AddressTypeClass::Unknown
        }
    }

    /// Every type worth asking the provider about, without duplicates
    pub fn watched_types(&self) -> Vec<String> {
        let mut types = vec![self.address_type.clone()];
        for t in self
            .equivalent_address_types
            .iter()
            .chain(&self.conflicting_address_types)
        {
            if !types.contains(t) {
                types.push(t.clone());
            }
        }
        types
    }
}

fn default_address_type() -> String {
    ADDRESS_TYPE_ANYCAST.to_string()
}

fn default_conflicting_address_types() -> Vec<String> {
    [
        ADDRESS_TYPE_WAN_IP,
        ADDRESS_TYPE_COMMON,
        ADDRESS_TYPE_ANYCAST,
        ADDRESS_TYPE_HIGH_QUALITY,
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

/// Node eligibility settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Labels a node must carry, with these exact values
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of reconcile tasks in flight
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Whether the reverse sweep runs at all
    #[serde(default)]
    pub enable_reverse_reconcile: bool,

    /// Interval between reverse sweeps (in seconds)
    #[serde(default = "default_reverse_reconcile_interval_secs")]
    pub reverse_reconcile_interval_secs: u64,

    /// Wait between disassociating legacy addresses and releasing them (in seconds)
    #[serde(default = "default_release_grace_secs")]
    pub release_grace_secs: u64,

    /// Base of the per-node exponential requeue delay (in milliseconds)
    #[serde(default = "default_requeue_base_delay_ms")]
    pub requeue_base_delay_ms: u64,

    /// Cap of the per-node requeue delay (in seconds)
    #[serde(default = "default_requeue_max_delay_secs")]
    pub requeue_max_delay_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new engine events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            enable_reverse_reconcile: false,
            reverse_reconcile_interval_secs: default_reverse_reconcile_interval_secs(),
            release_grace_secs: default_release_grace_secs(),
            requeue_base_delay_ms: default_requeue_base_delay_ms(),
            requeue_max_delay_secs: default_requeue_max_delay_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::config("engine.maxConcurrentReconciles must be > 0"));
        }
        if self.reverse_reconcile_interval_secs == 0 {
            return Err(Error::config("engine.reverseReconcileIntervalSecs must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("engine.eventChannelCapacity must be > 0"));
        }
        Ok(())
    }

    pub fn reverse_reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reverse_reconcile_interval_secs)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_secs(self.release_grace_secs)
    }

    /// Requeue delay after `failures` consecutive failures of one node
    pub fn requeue_delay(&self, failures: u32) -> Duration {
        let max = Duration::from_secs(self.requeue_max_delay_secs);
        let factor = 2u64.saturating_pow(failures.min(32));
        Duration::from_millis(self.requeue_base_delay_ms.saturating_mul(factor)).min(max)
    }
}

fn default_max_concurrent_reconciles() -> usize {
    1
}

fn default_reverse_reconcile_interval_secs() -> u64 {
    60
}

fn default_release_grace_secs() -> u64 {
    10
}

fn default_requeue_base_delay_ms() -> u64 {
    5
}

fn default_requeue_max_delay_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1000
}

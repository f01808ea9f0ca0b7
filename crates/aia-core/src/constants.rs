//! Well-known names shared by the controller, the cloud provider and the
//! cluster integration.

use std::time::Duration;

/// Node label carrying the cloud instance id, set once when the machine registers
pub const NODE_INSTANCE_ID_LABEL: &str = "cloud.tencent.com/node-instance-id";

// Address types
pub const ADDRESS_TYPE_WAN_IP: &str = "WanIP";
pub const ADDRESS_TYPE_COMMON: &str = "EIP";
pub const ADDRESS_TYPE_ANYCAST: &str = "AnycastEIP";
pub const ADDRESS_TYPE_HIGH_QUALITY: &str = "HighQualityEIP";

/// Identifier prefix of every address the network API returns
pub const ADDRESS_ID_PREFIX: &str = "eip-";

/// Address status strings as reported by the network API
pub const ADDRESS_STATUS_BOUND: &str = "BIND";
pub const ADDRESS_STATUS_UNBOUND: &str = "UNBIND";

// Tag keys attached to every allocated address
pub const TAG_CLUSTER_UUID: &str = "aia-official-cluster-uuid";
pub const TAG_CLUSTER_ID: &str = "aia-official-cluster-id";
pub const TAG_NODE_NAME: &str = "aia-node-name";
pub const TAG_NODE_INSTANCE_ID: &str = "aia-node-ins-id";

// Scheduling exclusion for nodes without an address
pub const NO_ADDRESS_TAINT_KEY: &str = "tke.cloud.tencent.com/no-aia-ip";
pub const NO_ADDRESS_TAINT_VALUE: &str = "true";
pub const NO_ADDRESS_TAINT_EFFECT: &str = "NoSchedule";

// Node annotations describing the bound address
pub const ADDRESS_ID_ANNOTATION: &str = "tke.cloud.tencent.com/anycast-ip-id";
pub const ADDRESS_IP_ANNOTATION: &str = "tke.cloud.tencent.com/anycast-ip-address";

/// Warning event reasons.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    pub const FAILED_ALLOCATE: &str = "FailedAllocateAnycastIp";
    pub const FAILED_ASSOCIATE: &str = "FailedAssociateAnycastIp";
    pub const FAILED_UNTAINT: &str = "FailedUntaintNode";
}

// Cluster identity record
pub const IDENTITY_NAMESPACE: &str = "kube-system";
pub const IDENTITY_RECORD_NAME: &str = TAG_CLUSTER_UUID;
pub const IDENTITY_DATA_KEY: &str = TAG_CLUSTER_UUID;

// Tag search scoping. The tag API returns the same address under several
// service types, so searches are always pinned to the network class.
pub const TAG_SERVICE_TYPE: &str = "vpc";
pub const TAG_RESOURCE_PREFIX: &str = "eip";

// Pagination bounds
pub const SEARCH_PAGE_SIZE: u64 = 200;
pub const SEARCH_MAX_ROUNDS: usize = 100;
pub const TAG_DESCRIBE_BATCH: usize = 20;
pub const TAG_DESCRIBE_PAGE_SIZE: u64 = 400;
pub const TAG_DESCRIBE_MAX_ROUNDS: usize = 500;
pub const DESCRIBE_ADDRESS_BATCH: usize = 100;

/// Wait between disassociating legacy addresses and releasing them
pub const RELEASE_GRACE: Duration = Duration::from_secs(10);

/// Default interval of the reverse reconcile sweep
pub const REVERSE_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Name used when allocating addresses and reporting events
pub const COMPONENT_NAME: &str = "aia-ip-controller";

// # Kubernetes bindings for the anycast IP controller
//
// Implements the cluster-facing traits of `aia-core` over the Kubernetes API:
//
// - [`KubeNodeStore`]: Read and merge-patch nodes
// - [`KubeNodeEventSource`]: Node watch with before/after snapshots
// - [`ConfigMapRecordStore`]: Cluster identity record
// - [`KubeEventPublisher`]: Warning events on nodes
// - [`LeaseLeadership`]: Lease-based leader election

pub mod convert;
pub mod events;
pub mod leadership;
pub mod node_source;
pub mod node_store;
pub mod record_store;

pub use events::{COMPONENT_NAME, KubeEventPublisher};
pub use leadership::{LeaderElectionError, LeaderGuard, LeaseLeadership};
pub use node_source::{KubeNodeEventSource, NodeEventTranslator};
pub use node_store::KubeNodeStore;
pub use record_store::ConfigMapRecordStore;

// # aia-core
//
// Core library for the anycast IP controller.
//
// ## Architecture Overview
//
// This library binds the lifecycle of a cluster node to the lifecycle of a
// globally-routable (anycast) IP address:
// - **EligibilityFilter**: Decides which node notifications enter the queue
// - **AddressManager**: Stateless façade over the cloud network and tag APIs
// - **ForwardReconciler**: Per-node allocate/associate/release state machine
// - **GarbageCollector**: Periodic sweep reclaiming addresses of vanished nodes
// - **Engine**: Work queue driving the reconciler with bounded concurrency
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from cloud/cluster bindings
// 2. **Event-Driven**: Node notifications arrive as an async stream
// 3. **Idempotency**: Every operation can be repeated safely after partial failure
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Tags are the only durable link**: No mapping table beyond cloud tags

pub mod collector;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod manager;
pub mod model;
pub mod reconciler;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use collector::{GarbageCollector, SweepReport};
pub use config::{
    AddressConfig, AddressTypeClass, ControllerConfig, CredentialConfig, EngineConfig, LockConfig,
    NodeConfig, RegionConfig,
};
pub use engine::{Engine, EngineEvent};
pub use error::{Error, ErrorClass, Result};
pub use filter::EligibilityFilter;
pub use identity::{ClusterIdentity, bootstrap_cluster_identity};
pub use manager::AddressManager;
pub use model::{Address, AddressStatus, Node, NodeEvent, NodePatch, NodePhase, Taint};
pub use reconciler::{ForwardReconciler, ReconcileOutcome};
pub use state::MemoryRecordStore;
pub use traits::{
    AddressProvider, AlwaysLeader, ClusterRecordStore, EventPublisher, LeaderLatch,
    LeadershipStatus, NodeEventSource, NodeReconciler, NodeStore, NoopEventPublisher, TagProvider,
};

//! Core traits for the anycast IP controller
//!
//! This module defines the abstract interfaces the reconcilers are written against.
//!
//! - [`AddressProvider`]: Cloud network API (allocate, describe, bind, release)
//! - [`TagProvider`]: Cloud tag API (search by tag, read tags, create tags)
//! - [`NodeStore`]: Read and patch cluster nodes
//! - [`NodeEventSource`]: Stream of node notifications
//! - [`ClusterRecordStore`]: Cluster-scoped key/value records
//! - [`EventPublisher`]: Operator-visible warnings attached to nodes
//! - [`LeadershipStatus`]: Whether this replica may run the sweep
//! - [`NodeReconciler`]: Unit of work dispatched by the engine

pub mod address_provider;
pub mod events;
pub mod leadership;
pub mod node_source;
pub mod node_store;
pub mod reconcile;
pub mod record_store;
pub mod tag_provider;

pub use address_provider::AddressProvider;
pub use events::{EventPublisher, NoopEventPublisher};
pub use leadership::{AlwaysLeader, LeaderLatch, LeadershipStatus};
pub use node_source::NodeEventSource;
pub use node_store::NodeStore;
pub use reconcile::NodeReconciler;
pub use record_store::ClusterRecordStore;
pub use tag_provider::TagProvider;

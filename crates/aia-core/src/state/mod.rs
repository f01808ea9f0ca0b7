// # Cluster Record Store Implementations
//
// In-process implementation of the ClusterRecordStore trait. The Kubernetes
// ConfigMap-backed store lives in `aia-kube`.

pub mod memory;

pub use memory::MemoryRecordStore;

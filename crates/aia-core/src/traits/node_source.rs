// # Node Event Source Trait
//
// Defines the interface for observing node creation, update and deletion.
//
// ## Implementations
//
// - Kubernetes watch: `aia-kube` crate
//
// ## Usage
//
// ```rust,ignore
// use aia_core::NodeEventSource;
// use tokio_stream::StreamExt;
//
// let mut stream = source.watch();
// while let Some(event) = stream.next().await {
//     println!("node event: {:?}", event.node_name());
// }
// ```

use std::pin::Pin;
use tokio_stream::Stream;

use crate::model::NodeEvent;

/// Trait for node event source implementations
///
/// Sources are observers only. They translate cluster notifications into
/// [`NodeEvent`]s and never decide whether a node needs work; that is the
/// eligibility filter's and the reconciler's job.
pub trait NodeEventSource: Send + Sync {
    /// Watch for node changes
    ///
    /// # Behavior
    ///
    /// - Yields a `Created` event for every node present when the watch starts
    /// - Reconnects on its own after transient failures
    /// - Must be cancellation-safe (dropping the stream cleans up resources)
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>>;
}

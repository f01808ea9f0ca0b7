// # Event Publisher Trait
//
// Operator-visible warnings attached to a node. Publishing is fire-and-forget:
// a failure to record an event never affects reconciliation.

use async_trait::async_trait;

use crate::model::Node;

/// Trait for publishing warning events about nodes
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a warning
    ///
    /// # Parameters
    ///
    /// - `node`: The node the warning concerns
    /// - `reason`: Short machine-readable reason (see [`crate::constants::reasons`])
    /// - `note`: Human-readable message
    async fn publish_warning(&self, node: &Node, reason: &str, note: &str);
}

/// Publisher that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish_warning(&self, _node: &Node, _reason: &str, _note: &str) {}
}

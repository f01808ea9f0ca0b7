// # Kubernetes Event recording
//
// Warnings are fire-and-forget: a failed publish is logged and never
// reaches the reconciler.

use aia_core::model::Node;
use aia_core::traits::EventPublisher;
use async_trait::async_trait;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

use crate::convert::node_reference;

/// Reporting component shown on every event
pub const COMPONENT_NAME: &str = "aia-ip-controller";

const ACTION: &str = "Reconcile";

/// Publishes node warnings through `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: COMPONENT_NAME.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish_warning(&self, node: &Node, reason: &str, note: &str) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: ACTION.to_string(),
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(&event, &node_reference(node)).await {
            warn!(
                node = %node.name,
                reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

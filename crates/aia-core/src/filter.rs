//! Node eligibility filter
//!
//! Pure predicate deciding which node notifications enter the work queue.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{Node, NodeEvent};

/// Decides whether a node notification is worth reconciling
#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    required_labels: BTreeMap<String, String>,
}

impl EligibilityFilter {
    pub fn new(required_labels: BTreeMap<String, String>) -> Self {
        Self { required_labels }
    }

    /// A node is eligible when it carries every required label with the
    /// required value and already has a non-empty instance id.
    pub fn is_eligible(&self, node: &Node) -> bool {
        let labels_match = self
            .required_labels
            .iter()
            .all(|(key, value)| node.labels.get(key) == Some(value));

        labels_match && node.instance_id().is_some()
    }

    /// Whether `event` should enqueue a reconcile task.
    ///
    /// Updates are only considered when the label set changed. An update with
    /// a missing snapshot on either side is rejected.
    pub fn admits(&self, event: &NodeEvent) -> bool {
        match event {
            NodeEvent::Created(node) => {
                debug!(node = %node.name, instance_id = ?node.instance_id(), "Node created");
                self.is_eligible(node)
            }
            NodeEvent::Deleted(node) => {
                debug!(node = %node.name, instance_id = ?node.instance_id(), "Node deleted");
                self.is_eligible(node)
            }
            NodeEvent::Updated {
                old: Some(old),
                new: Some(new),
            } => {
                if old.labels == new.labels {
                    debug!(node = %new.name, "Node labels unchanged, not enqueuing");
                    return false;
                }
                debug!(node = %new.name, instance_id = ?new.instance_id(), "Node labels changed");
                self.is_eligible(new)
            }
            NodeEvent::Updated { .. } => {
                debug!(node = ?event.node_name(), "Update event missing a node snapshot, not enqueuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> EligibilityFilter {
        EligibilityFilter::new(BTreeMap::from([(
            "aia.example.com/enabled".to_string(),
            "true".to_string(),
        )]))
    }

    fn eligible(name: &str) -> Node {
        Node::new(name)
            .with_label("aia.example.com/enabled", "true")
            .with_instance_id("ins-1")
    }

    #[test]
    fn requires_labels_and_instance_id() {
        let f = filter();
        assert!(f.is_eligible(&eligible("n1")));

        let wrong_value = Node::new("n1")
            .with_label("aia.example.com/enabled", "false")
            .with_instance_id("ins-1");
        assert!(!f.is_eligible(&wrong_value));

        let no_instance = Node::new("n1").with_label("aia.example.com/enabled", "true");
        assert!(!f.is_eligible(&no_instance));
    }

    #[test]
    fn empty_requirement_only_needs_instance_id() {
        let f = EligibilityFilter::default();
        assert!(f.is_eligible(&Node::new("n1").with_instance_id("ins-1")));
        assert!(!f.is_eligible(&Node::new("n1")));
    }

    #[test]
    fn create_and_delete_use_current_labels() {
        let f = filter();
        assert!(f.admits(&NodeEvent::Created(eligible("n1"))));
        assert!(f.admits(&NodeEvent::Deleted(eligible("n1"))));
        assert!(!f.admits(&NodeEvent::Created(Node::new("n1"))));
    }

    #[test]
    fn terminated_node_is_admitted_for_the_reconciler() {
        let f = filter();
        let mut node = eligible("n1");
        node.phase = Some(crate::model::NodePhase::Terminated);

        assert!(f.admits(&NodeEvent::Created(node.clone())));
        assert!(f.admits(&NodeEvent::Deleted(node)));
    }

    #[test]
    fn update_without_label_change_is_ignored() {
        let f = filter();
        let old = eligible("n1");
        let mut new = old.clone();
        new.annotations.insert("unrelated".to_string(), "x".to_string());

        assert!(!f.admits(&NodeEvent::Updated {
            old: Some(old),
            new: Some(new),
        }));
    }

    #[test]
    fn update_with_label_change_is_evaluated_on_new_snapshot() {
        let f = filter();
        let old = Node::new("n1").with_instance_id("ins-1");
        let new = eligible("n1");

        assert!(f.admits(&NodeEvent::Updated {
            old: Some(old.clone()),
            new: Some(new.clone()),
        }));
        assert!(!f.admits(&NodeEvent::Updated {
            old: Some(new),
            new: Some(old),
        }));
    }

    #[test]
    fn half_formed_update_is_ineligible() {
        let f = filter();
        assert!(!f.admits(&NodeEvent::Updated {
            old: None,
            new: Some(eligible("n1")),
        }));
        assert!(!f.admits(&NodeEvent::Updated {
            old: Some(eligible("n1")),
            new: None,
        }));
    }
}

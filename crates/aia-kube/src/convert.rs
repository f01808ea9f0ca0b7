// # Conversions between Kubernetes objects and the controller's model

use std::collections::BTreeMap;

use aia_core::model::{Node, NodePhase, Taint};
use k8s_openapi::api::core::v1::{Node as K8sNode, ObjectReference};

/// Reduce a Kubernetes node to the controller's snapshot
///
/// Returns `None` for objects without a name, which cannot be keyed.
pub fn node_from_k8s(node: &K8sNode) -> Option<Node> {
    let name = node.metadata.name.clone().filter(|n| !n.is_empty())?;

    let taints = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|t| Taint {
                    key: t.key.clone(),
                    value: t.value.clone(),
                    effect: t.effect.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let phase = node
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(NodePhase::parse);

    Some(Node {
        name,
        uid: node.metadata.uid.clone(),
        labels: node.metadata.labels.clone().unwrap_or_else(BTreeMap::new),
        annotations: node.metadata.annotations.clone().unwrap_or_else(BTreeMap::new),
        taints,
        phase,
    })
}

/// Reference used to attach events to a node
pub fn node_reference(node: &Node) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Node".to_string()),
        name: Some(node.name.clone()),
        uid: node.uid.clone(),
        ..Default::default()
    }
}

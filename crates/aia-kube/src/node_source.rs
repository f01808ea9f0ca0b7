// # Node watch
//
// Wraps `kube::runtime::watcher` and turns its object stream into
// [`NodeEvent`]s carrying before/after snapshots. The watcher itself
// reconnects with the default backoff; a re-list after reconnecting is
// diffed against the last-seen snapshots so deletions missed while
// disconnected still surface as `Deleted`.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;

use aia_core::model::{Node, NodeEvent};
use aia_core::traits::NodeEventSource;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::convert::node_from_k8s;

/// Node event source backed by a Kubernetes watch
pub struct KubeNodeEventSource {
    api: Api<K8sNode>,
}

impl KubeNodeEventSource {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

impl NodeEventSource for KubeNodeEventSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>> {
        let mut translator = NodeEventTranslator::default();

        let stream = watcher::watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .flat_map(move |event| {
                let events = match event {
                    Ok(event) => translator.translate(event),
                    Err(e) => {
                        warn!(error = %e, "Node watch error, backing off");
                        Vec::new()
                    }
                };
                futures::stream::iter(events)
            });

        Box::pin(stream)
    }
}

/// Turns raw watch events into node notifications
///
/// Keeps the last-seen snapshot of every node so an `Apply` can be reported
/// as `Created` or as `Updated { old, new }`.
#[derive(Debug, Default)]
pub struct NodeEventTranslator {
    known: HashMap<String, Node>,
    /// Names seen since the current re-list started
    relisting: Option<HashSet<String>>,
}

impl NodeEventTranslator {
    pub fn translate(&mut self, event: Event<K8sNode>) -> Vec<NodeEvent> {
        match event {
            Event::Init => {
                debug!(known = self.known.len(), "Node re-list started");
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(object) | Event::Apply(object) => self.apply(&object),
            Event::InitDone => self.finish_relist(),
            Event::Delete(object) => {
                let Some(node) = node_from_k8s(&object) else {
                    return Vec::new();
                };
                self.known.remove(&node.name);
                if let Some(seen) = self.relisting.as_mut() {
                    seen.remove(&node.name);
                }
                vec![NodeEvent::Deleted(node)]
            }
        }
    }

    fn apply(&mut self, object: &K8sNode) -> Vec<NodeEvent> {
        let Some(node) = node_from_k8s(object) else {
            debug!("Ignoring node object without a name");
            return Vec::new();
        };

        if let Some(seen) = self.relisting.as_mut() {
            seen.insert(node.name.clone());
        }

        match self.known.insert(node.name.clone(), node.clone()) {
            None => vec![NodeEvent::Created(node)],
            Some(old) => vec![NodeEvent::Updated {
                old: Some(old),
                new: Some(node),
            }],
        }
    }

    fn finish_relist(&mut self) -> Vec<NodeEvent> {
        let Some(seen) = self.relisting.take() else {
            return Vec::new();
        };

        let gone: Vec<String> = self
            .known
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();

        gone.into_iter()
            .filter_map(|name| self.known.remove(&name))
            .map(|node| {
                debug!(node = %node.name, "Node vanished while the watch was down");
                NodeEvent::Deleted(node)
            })
            .collect()
    }
}

// # Node store backed by the Kubernetes API

use aia_core::model::{Node, NodePatch};
use aia_core::traits::NodeStore;
use aia_core::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

use crate::convert::node_from_k8s;

/// Page size used when listing node names
const LIST_PAGE_SIZE: u32 = 500;

/// Reads and patches cluster nodes
#[derive(Clone)]
pub struct KubeNodeStore {
    api: Api<K8sNode>,
}

impl KubeNodeStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let object = self
            .api
            .get_opt(name)
            .await
            .map_err(|e| Error::node_store(format!("get node {name}: {e}")))?;

        Ok(object.as_ref().and_then(node_from_k8s))
    }

    async fn list_node_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
            if let Some(token) = continue_token.take() {
                params = params.continue_token(&token);
            }

            let page = self
                .api
                .list_metadata(&params)
                .await
                .map_err(|e| Error::node_store(format!("list nodes: {e}")))?;

            names.extend(page.items.into_iter().filter_map(|item| item.metadata.name));

            match page.metadata.continue_.filter(|t| !t.is_empty()) {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        debug!(count = names.len(), "Listed node names");
        Ok(names)
    }

    async fn patch_node(&self, name: &str, patch: &NodePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let body = patch.to_merge_patch();
        match self
            .api
            .patch(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
        {
            Ok(_) => {
                debug!(node = name, "Patched node");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(Error::not_found(format!("node {name}")))
            }
            Err(e) => Err(Error::node_store(format!("patch node {name}: {e}"))),
        }
    }
}

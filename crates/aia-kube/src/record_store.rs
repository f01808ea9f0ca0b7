// # Cluster records stored as ConfigMaps
//
// Creation relies on the API server rejecting a second create of the same
// name with 409, which gives the atomic create-if-absent the identity
// bootstrap needs.

use std::collections::BTreeMap;

use aia_core::constants::IDENTITY_NAMESPACE;
use aia_core::traits::ClusterRecordStore;
use aia_core::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

/// Record store over ConfigMaps in one namespace
#[derive(Clone)]
pub struct ConfigMapRecordStore {
    api: Api<ConfigMap>,
    namespace: String,
}

impl ConfigMapRecordStore {
    /// Store in the default namespace (`kube-system`)
    pub fn new(client: Client) -> Self {
        Self::namespaced(client, IDENTITY_NAMESPACE)
    }

    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ClusterRecordStore for ConfigMapRecordStore {
    async fn get_record(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        match self.api.get(name).await {
            Ok(config_map) => Ok(Some(config_map.data.unwrap_or_default())),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::record_store(format!(
                "get configmap {}/{name}: {e}",
                self.namespace
            ))),
        }
    }

    async fn create_record(&self, name: &str, data: BTreeMap<String, String>) -> Result<()> {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        match self.api.create(&PostParams::default(), &config_map).await {
            Ok(_) => {
                debug!(namespace = %self.namespace, record = name, "Created configmap");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::already_exists(format!(
                "configmap {}/{name}",
                self.namespace
            ))),
            Err(e) => Err(Error::record_store(format!(
                "create configmap {}/{name}: {e}",
                self.namespace
            ))),
        }
    }
}

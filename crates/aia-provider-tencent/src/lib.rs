// # Tencent Cloud Provider
//
// This crate implements the controller's cloud seams over Tencent Cloud
// API v3:
//
// - `AddressProvider` on the VPC service (`vpc.tencentcloudapi.com`, 2017-03-12)
// - `TagProvider` on the Tag service (`tag.tencentcloudapi.com`, 2018-08-13)
//
// ## Architectural Constraints
//
// The provider is stateless and single-shot:
//
// - One signed HTTP POST per trait call
// - Remote error codes are mapped onto `aia_core::Error`; nothing is retried
//   here (the engine's work queue owns redelivery and backoff)
// - No background tasks, no caching
//
// ## Security Requirements
//
// - The secret key NEVER appears in logs or `Debug` output
// - Construction fails fast if either credential half is empty
//
// ## API Reference
//
// - Signature v3: https://cloud.tencent.com/document/api/215/15693
// - VPC: AllocateAddresses, DescribeAddresses, AssociateAddress,
//   DisassociateAddress, ReleaseAddresses
// - Tag: DescribeResourcesByTags, DescribeResourceTagsByTagKeys, CreateTag

mod signing;
mod wire;

use std::time::Duration;

use aia_core::config::ControllerConfig;
use aia_core::constants::ADDRESS_ID_PREFIX;
use aia_core::model::{
    Address, AllocateRequest, ResourceTagPage, ResourceTagQuery, TagSearch, TagSearchPage,
};
use aia_core::traits::{AddressProvider, TagProvider};
use aia_core::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use signing::Tc3Signer;
use wire::*;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound the VPC API accepts for `DescribeAddresses.Limit`
const DESCRIBE_LIMIT: u64 = 100;

/// One Tencent Cloud service endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    service: &'static str,
    version: &'static str,
    host: String,
}

impl Endpoint {
    fn public(service: &'static str, version: &'static str) -> Self {
        Self {
            service,
            version,
            host: format!("{service}.tencentcloudapi.com"),
        }
    }
}

/// Tencent Cloud VPC + Tag provider
///
/// # Security
///
/// The Debug implementation does NOT expose the secret key.
#[derive(Debug)]
pub struct TencentCloudProvider {
    signer: Tc3Signer,
    region: String,
    vpc: Endpoint,
    tag: Endpoint,
    client: reqwest::Client,
}

impl TencentCloudProvider {
    /// Create a new provider
    ///
    /// # Parameters
    ///
    /// - `secret_id`: API secret id
    /// - `secret_key`: API secret key
    /// - `region`: Region long name, e.g. `ap-guangzhou`
    ///
    /// # Errors
    ///
    /// `Error::Config` if a credential half or the region is empty, or the
    /// HTTP client cannot be built.
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self> {
        let (secret_id, secret_key, region) = (secret_id.into(), secret_key.into(), region.into());

        if secret_id.is_empty() || secret_key.is_empty() {
            return Err(Error::config("Tencent Cloud secret id and secret key are required"));
        }
        if region.is_empty() {
            return Err(Error::config("Tencent Cloud region is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            signer: Tc3Signer::new(secret_id, secret_key),
            region,
            vpc: Endpoint::public("vpc", "2017-03-12"),
            tag: Endpoint::public("tag", "2018-08-13"),
            client,
        })
    }

    /// Create a provider from the controller's credential and region sections
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        Self::new(
            config.credential.secret_id.clone(),
            config.credential.secret_key.clone(),
            config.region.long_name.clone(),
        )
    }

    /// Override the API hosts, e.g. `vpc.internal.tencentcloudapi.com` from
    /// inside the cloud network
    pub fn with_hosts(mut self, vpc_host: impl Into<String>, tag_host: impl Into<String>) -> Self {
        self.vpc.host = vpc_host.into();
        self.tag.host = tag_host.into();
        self
    }

    /// Send one signed action and decode its `Response` payload
    async fn call<Req, Resp>(&self, endpoint: &Endpoint, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let now = Utc::now();
        let authorization =
            self.signer
                .authorization(endpoint.service, &endpoint.host, now, &payload)?;

        debug!(service = endpoint.service, action, "Calling Tencent Cloud API");

        let response = self
            .client
            .post(format!("https://{}/", endpoint.host))
            .header(reqwest::header::CONTENT_TYPE, signing::CONTENT_TYPE)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header("X-TC-Action", action)
            .header("X-TC-Version", endpoint.version)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("X-TC-Region", &self.region)
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::http(format!("{action}: request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::http(format!("{action}: failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(map_http_status(
                action,
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }

        decode_response(action, &body)
    }

    async fn describe(&self, request: DescribeAddressesRequest) -> Result<Vec<Address>> {
        let response: DescribeAddressesResponse =
            self.call(&self.vpc, "DescribeAddresses", &request).await?;
        Ok(response
            .address_set
            .into_iter()
            .map(AddressInfo::into_address)
            .collect())
    }
}

fn allocate_request(request: &AllocateRequest) -> AllocateAddressesRequest {
    AllocateAddressesRequest {
        address_count: 1,
        address_type: request.address_type.clone(),
        address_name: request.name.clone(),
        anycast_zone: request.zone.clone().filter(|z| !z.is_empty()),
        internet_max_bandwidth_out: request.bandwidth.filter(|b| *b > 0),
        tags: request
            .tags
            .iter()
            .map(|(key, value)| VpcTag {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}

/// The single `eip-` id a successful allocation must return
fn allocated_id(response: AllocateAddressesResponse) -> Result<String> {
    let mut ids = response.address_set;
    if ids.len() != 1 {
        return Err(Error::provider(
            PROVIDER,
            format!(
                "AllocateAddresses returned {} addresses, expected 1 (RequestId {})",
                ids.len(),
                response.request_id
            ),
        ));
    }

    let id = ids.remove(0);
    if !id.starts_with(ADDRESS_ID_PREFIX) {
        return Err(Error::provider(
            PROVIDER,
            format!("AllocateAddresses returned invalid id {id}, expected prefix {ADDRESS_ID_PREFIX}"),
        ));
    }
    Ok(id)
}

fn instance_filters(instance_id: &str, address_types: &[String]) -> Vec<Filter> {
    let mut filters = vec![Filter {
        name: "instance-id".to_string(),
        values: vec![instance_id.to_string()],
    }];
    if !address_types.is_empty() {
        filters.push(Filter {
            name: "address-type".to_string(),
            values: address_types.to_vec(),
        });
    }
    filters
}

#[async_trait]
impl AddressProvider for TencentCloudProvider {
    async fn allocate_address(&self, request: &AllocateRequest) -> Result<String> {
        let response: AllocateAddressesResponse = self
            .call(&self.vpc, "AllocateAddresses", &allocate_request(request))
            .await?;
        let id = allocated_id(response)?;
        info!(address_id = %id, address_type = %request.address_type, "Allocated address");
        Ok(id)
    }

    async fn describe_addresses(&self, address_ids: &[String]) -> Result<Vec<Address>> {
        if address_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.describe(DescribeAddressesRequest {
            address_ids: address_ids.to_vec(),
            limit: address_ids.len().min(DESCRIBE_LIMIT as usize) as u64,
            ..Default::default()
        })
        .await
    }

    async fn describe_instance_addresses(
        &self,
        instance_id: &str,
        address_types: &[String],
    ) -> Result<Vec<Address>> {
        self.describe(DescribeAddressesRequest {
            filters: instance_filters(instance_id, address_types),
            limit: DESCRIBE_LIMIT,
            ..Default::default()
        })
        .await
    }

    async fn associate_address(&self, address_id: &str, instance_id: &str) -> Result<()> {
        let ack: Acknowledged = self
            .call(
                &self.vpc,
                "AssociateAddress",
                &AssociateAddressRequest {
                    address_id: address_id.to_string(),
                    instance_id: instance_id.to_string(),
                },
            )
            .await?;
        debug!(address_id, instance_id, request_id = %ack.request_id, "Associate requested");
        Ok(())
    }

    async fn disassociate_address(&self, address_id: &str) -> Result<()> {
        let ack: Acknowledged = self
            .call(
                &self.vpc,
                "DisassociateAddress",
                &DisassociateAddressRequest {
                    address_id: address_id.to_string(),
                },
            )
            .await?;
        debug!(address_id, request_id = %ack.request_id, "Disassociate requested");
        Ok(())
    }

    async fn release_addresses(&self, address_ids: &[String]) -> Result<()> {
        let ack: Acknowledged = self
            .call(
                &self.vpc,
                "ReleaseAddresses",
                &ReleaseAddressesRequest {
                    address_ids: address_ids.to_vec(),
                },
            )
            .await?;
        info!(address_ids = ?address_ids, request_id = %ack.request_id, "Released addresses");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

#[async_trait]
impl TagProvider for TencentCloudProvider {
    async fn search_resources(
        &self,
        search: &TagSearch,
        offset: u64,
        limit: u64,
    ) -> Result<TagSearchPage> {
        let request = DescribeResourcesByTagsRequest {
            tag_filters: search
                .filters
                .iter()
                .map(|f| TagFilter {
                    tag_key: f.key.clone(),
                    tag_value: f.values.clone(),
                })
                .collect(),
            service_type: search.service_type.clone(),
            offset,
            limit,
        };

        let response: DescribeResourcesByTagsResponse = self
            .call(&self.tag, "DescribeResourcesByTags", &request)
            .await?;

        Ok(TagSearchPage {
            total_count: response.total_count,
            resource_ids: response
                .rows
                .into_iter()
                .filter_map(|row| row.resource_id)
                .collect(),
        })
    }

    async fn describe_resource_tags(
        &self,
        query: &ResourceTagQuery,
        offset: u64,
        limit: u64,
    ) -> Result<ResourceTagPage> {
        let request = DescribeResourceTagsByTagKeysRequest {
            service_type: query.service_type.clone(),
            resource_prefix: query.resource_prefix.clone(),
            resource_region: query.region.clone(),
            resource_ids: query.resource_ids.clone(),
            tag_keys: query.tag_keys.clone(),
            offset,
            limit,
        };

        let response: DescribeResourceTagsByTagKeysResponse = self
            .call(&self.tag, "DescribeResourceTagsByTagKeys", &request)
            .await?;

        Ok(ResourceTagPage {
            total_count: response.total_count,
            rows: response
                .rows
                .into_iter()
                .map(ResourceTagRow::into_resource_tags)
                .collect(),
        })
    }

    async fn create_tag(&self, key: &str, value: &str) -> Result<()> {
        let _: Acknowledged = self
            .call(
                &self.tag,
                "CreateTag",
                &CreateTagRequest {
                    tag_key: key.to_string(),
                    tag_value: value.to_string(),
                },
            )
            .await?;
        debug!(key, value, "Created tag");
        Ok(())
    }
}

// # Tencent Cloud API v3 Wire Types
//
// Request and response bodies for the VPC (2017-03-12) and Tag (2018-08-13)
// actions the controller uses. Every response is wrapped in
// `{"Response": {..., "RequestId": "..", "Error"?: {"Code": "..", "Message": ".."}}}`.

use std::collections::BTreeMap;
use std::net::IpAddr;

use aia_core::model::{Address, AddressStatus, ResourceTags};
use aia_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub(crate) const PROVIDER: &str = "tencentcloud";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    message: String,
}

/// Unwrap a response body into the action's payload type
///
/// # Returns
///
/// - `Ok(T)`: The `Response` object decoded as `T`
/// - `Err(Error)`: The API reported an error, mapped with [`map_api_error`]
pub(crate) fn decode_response<T: DeserializeOwned>(action: &str, body: &[u8]) -> Result<T> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        Error::provider(PROVIDER, format!("{action}: malformed response: {e}"))
    })?;

    if let Some(raw) = envelope.response.get("Error") {
        let request_id = envelope
            .response
            .get("RequestId")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let api_error: ApiError = serde_json::from_value(raw.clone())?;
        return Err(map_api_error(action, &api_error.code, &api_error.message, request_id));
    }

    serde_json::from_value(envelope.response)
        .map_err(|e| Error::provider(PROVIDER, format!("{action}: unexpected response shape: {e}")))
}

/// Map an API error code onto the controller's error taxonomy
pub(crate) fn map_api_error(action: &str, code: &str, message: &str, request_id: &str) -> Error {
    let detail = format!("{action}: {code}: {message} (RequestId {request_id})");

    match code {
        "InvalidTag.NotExisted" | "InvalidParameterValue.TagNotExisted" => Error::missing_tag(detail),
        c if c.ends_with("TagDuplicate") => Error::already_exists(detail),
        "InvalidAddressId.NotFound" => Error::not_found(detail),
        c if c.starts_with("ResourceNotFound") => Error::not_found(detail),
        c if c.starts_with("RequestLimitExceeded") => Error::rate_limited(detail),
        c if c.starts_with("AuthFailure") => Error::auth(detail),
        _ => Error::provider(PROVIDER, detail),
    }
}

/// Map a non-success HTTP status onto an error
pub(crate) fn map_http_status(action: &str, status: u16, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!("{action}: HTTP {status}")),
        429 => Error::rate_limited(format!("{action}: HTTP {status}")),
        500..=599 => Error::provider(
            PROVIDER,
            format!("{action}: server error (transient): HTTP {status} - {body}"),
        ),
        _ => Error::provider(PROVIDER, format!("{action}: HTTP {status} - {body}")),
    }
}

// ---------------------------------------------------------------------------
// VPC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct VpcTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AllocateAddressesRequest {
    pub address_count: i64,
    pub address_type: String,
    pub address_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anycast_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internet_max_bandwidth_out: Option<i64>,
    pub tags: Vec<VpcTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AllocateAddressesResponse {
    #[serde(default)]
    pub address_set: Vec<String>,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeAddressesRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeAddressesResponse {
    #[serde(default)]
    pub address_set: Vec<AddressInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AddressInfo {
    pub address_id: String,
    #[serde(default)]
    pub address_ip: Option<String>,
    #[serde(default)]
    pub address_status: Option<String>,
    #[serde(default)]
    pub address_type: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub tag_set: Vec<VpcTag>,
}

impl AddressInfo {
    pub(crate) fn into_address(self) -> Address {
        let ip = self
            .address_ip
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<IpAddr>().ok());

        Address {
            id: self.address_id,
            ip,
            status: AddressStatus::parse(self.address_status.as_deref().unwrap_or_default()),
            address_type: self.address_type.filter(|t| !t.is_empty()),
            instance_id: self.instance_id.filter(|i| !i.is_empty()),
            tags: self.tag_set.into_iter().map(|t| (t.key, t.value)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AssociateAddressRequest {
    pub address_id: String,
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DisassociateAddressRequest {
    pub address_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ReleaseAddressesRequest {
    pub address_ids: Vec<String>,
}

/// Body of actions whose response carries nothing but the request id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Acknowledged {
    #[serde(default)]
    pub request_id: String,
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TagFilter {
    pub tag_key: String,
    pub tag_value: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeResourcesByTagsRequest {
    pub tag_filters: Vec<TagFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeResourcesByTagsResponse {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub rows: Vec<ResourceRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ResourceRow {
    #[serde(default)]
    pub resource_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeResourceTagsByTagKeysRequest {
    pub service_type: String,
    pub resource_prefix: String,
    pub resource_region: String,
    pub resource_ids: Vec<String>,
    pub tag_keys: Vec<String>,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeResourceTagsByTagKeysResponse {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub rows: Vec<ResourceTagRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ResourceTagRow {
    pub resource_id: String,
    #[serde(default)]
    pub tag_key_values: Vec<TagKeyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TagKeyValue {
    pub tag_key: String,
    pub tag_value: String,
}

impl ResourceTagRow {
    pub(crate) fn into_resource_tags(self) -> ResourceTags {
        let tags: BTreeMap<String, String> = self
            .tag_key_values
            .into_iter()
            .map(|kv| (kv.tag_key, kv.tag_value))
            .collect();
        ResourceTags {
            resource_id: self.resource_id,
            tags,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateTagRequest {
    pub tag_key: String,
    pub tag_value: String,
}

// # TC3-HMAC-SHA256 Request Signing
//
// Tencent Cloud API v3 signs every request with a key derived from the
// secret key, the UTC date and the service name:
//
// ```text
// secret_date    = HMAC("TC3" + secret_key, date)
// secret_service = HMAC(secret_date, service)
// secret_signing = HMAC(secret_service, "tc3_request")
// signature      = hex(HMAC(secret_signing, string_to_sign))
// ```
//
// Only `content-type` and `host` are signed, which is what the API requires
// for JSON POST requests.

use aia_core::{Error, Result};
use chrono::{DateTime, Utc};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub(crate) const ALGORITHM: &str = "TC3-HMAC-SHA256";
pub(crate) const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host";

/// Signs requests with one credential pair
#[derive(Clone)]
pub(crate) struct Tc3Signer {
    secret_id: String,
    /// ⚠️ NEVER log this value
    secret_key: String,
}

impl std::fmt::Debug for Tc3Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tc3Signer")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

impl Tc3Signer {
    pub(crate) fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Build the `Authorization` header value for one request
    ///
    /// # Parameters
    ///
    /// - `service`: Service name, the first label of the host (`vpc`, `tag`)
    /// - `host`: Request host
    /// - `at`: Request time; must match the `X-TC-Timestamp` header
    /// - `payload`: Exact request body bytes
    pub(crate) fn authorization(
        &self,
        service: &str,
        host: &str,
        at: DateTime<Utc>,
        payload: &[u8],
    ) -> Result<String> {
        let date = at.format("%Y-%m-%d").to_string();
        let scope = format!("{date}/{service}/tc3_request");

        let canonical_request = format!(
            "POST\n/\n\ncontent-type:{CONTENT_TYPE}\nhost:{host}\n\n{SIGNED_HEADERS}\n{}",
            sha256_hex(payload)
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{scope}\n{}",
            at.timestamp(),
            sha256_hex(canonical_request.as_bytes())
        );

        let sign = || -> std::result::Result<String, InvalidLength> {
            let secret_date =
                hmac_sha256(format!("TC3{}", self.secret_key).as_bytes(), date.as_bytes())?;
            let secret_service = hmac_sha256(&secret_date, service.as_bytes())?;
            let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
            Ok(hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?))
        };
        let signature = sign().map_err(|e| Error::auth(format!("cannot sign request: {e}")))?;

        Ok(format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.secret_id
        ))
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> std::result::Result<Vec<u8>, InvalidLength> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

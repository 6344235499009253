//! AWS Signature Version 4 for the SES provider.

use crate::errors::DispatchError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "content-type;host;x-amz-date";

/// Access key pair and scope of a signed request.
#[derive(Debug, Clone)]
pub(crate) struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

/// One JSON request to sign. The body must be the exact bytes sent.
#[derive(Debug, Clone)]
pub(crate) struct SignableRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, DispatchError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| DispatchError::transport("SES", e))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Returns the `Authorization` and `X-Amz-Date` headers for `request`.
///
/// The signature also covers `content-type: application/json` and `host`,
/// which the HTTP client sends itself.
pub(crate) fn sign(
    creds: &Credentials<'_>,
    request: &SignableRequest<'_>,
    at: DateTime<Utc>,
) -> Result<BTreeMap<String, String>, DispatchError> {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-type:application/json\nhost:{}\nx-amz-date:{amz_date}\n",
        request.host
    );
    let canonical_request = format!(
        "{}\n{}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{}",
        request.method,
        request.path,
        sha256_hex(request.body)
    );

    let scope = format!("{date}/{}/{}/aws4_request", creds.region, creds.service);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", creds.secret_access_key).as_bytes(), &date)?;
    let k_region = hmac(&k_date, creds.region)?;
    let k_service = hmac(&k_region, creds.service)?;
    let k_signing = hmac(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac(&k_signing, &string_to_sign)?);

    let mut headers = BTreeMap::new();
    headers.insert(
        "Authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            creds.access_key_id
        ),
    );
    headers.insert("X-Amz-Date".to_string(), amz_date);
    Ok(headers)
}

//! S3 object store backend.
//!
//! Talks to the S3 REST API directly (`HEAD`, `GET`, `PUT` object) and signs
//! every request with AWS Signature Version 4 using `hmac` + `sha2`, so no
//! C library dependencies are pulled in.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//!
//! [storage.s3]
//! bucket = "filings"
//! prefix = "edgar-ingest/"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::ContentStore;
use crate::config::S3StoreConfig;
use crate::error::StoreError;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> anyhow::Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3Store {
    config: S3StoreConfig,
    creds: AwsCredentials,
    document_prefix: String,
    client: reqwest::Client,
}

impl S3Store {
    pub fn new(config: S3StoreConfig, creds: AwsCredentials, document_prefix: String) -> Self {
        Self {
            config,
            creds,
            document_prefix,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(config: S3StoreConfig, document_prefix: String) -> anyhow::Result<Self> {
        Ok(Self::new(config, AwsCredentials::from_env()?, document_prefix))
    }

    /// Full object key for a store key, with the configured bucket prefix.
    fn object_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        }
    }

    /// (scheme, host, canonical URI) for an object key.
    ///
    /// AWS uses virtual-hosted style; custom endpoints (MinIO, LocalStack)
    /// use path style.
    fn locate(&self, object_key: &str) -> (String, String, String) {
        let encoded_key = object_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");

        match &self.config.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                format!("/{}", encoded_key),
            ),
        }
    }

    fn signed_request(&self, method: reqwest::Method, key: &str, payload: &[u8]) -> reqwest::RequestBuilder {
        let object_key = self.object_key(key);
        let (scheme, host, canonical_uri) = self.locate(&object_key);
        let payload_hash = hex_sha256(payload);
        let headers = sign_request(
            method.as_str(),
            &host,
            &canonical_uri,
            &payload_hash,
            &self.config.region,
            &self.creds,
            Utc::now(),
        );

        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        let mut builder = self.client.request(method, url);
        for (name, value) in headers {
            if name != "host" {
                builder = builder.header(name, value);
            }
        }
        builder
    }

    fn remote_error(&self, key: &str, e: impl std::fmt::Display) -> StoreError {
        StoreError::Remote(format!(
            "s3://{}/{}: {}",
            self.config.bucket,
            self.object_key(key),
            e
        ))
    }
}

#[async_trait]
impl ContentStore for S3Store {
    fn backend(&self) -> &str {
        "s3"
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.config.prefix)
    }

    fn document_prefix(&self) -> &str {
        &self.document_prefix
    }

    async fn path_exists(&self, path: &str) -> Result<bool, StoreError> {
        let resp = self
            .signed_request(reqwest::Method::HEAD, path, b"")
            .send()
            .await
            .map_err(|e| self.remote_error(path, e))?;

        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(self.remote_error(path, format!("HeadObject failed (HTTP {})", status))),
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .signed_request(reqwest::Method::GET, path, b"")
            .send()
            .await
            .map_err(|e| self.remote_error(path, e))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(StoreError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(self.remote_error(path, format!("GetObject failed (HTTP {})", status)));
        }

        let bytes = resp.bytes().await.map_err(|e| self.remote_error(path, e))?;
        Ok(bytes.to_vec())
    }

    async fn put_path(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let resp = self
            .signed_request(reqwest::Method::PUT, path, bytes)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| self.remote_error(path, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.remote_error(
                path,
                format!(
                    "PutObject failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                ),
            ));
        }
        Ok(())
    }
}

// ============ AWS SigV4 ============

/// Build the signed header set for a request with no query string.
///
/// Returns `(name, value)` pairs including `authorization`.
fn sign_request(
    method: &str,
    host: &str,
    canonical_uri: &str,
    payload_hash: &str,
    region: &str,
    creds: &AwsCredentials,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
    ));
    headers
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

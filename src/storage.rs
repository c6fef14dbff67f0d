//! Object storage collaborator (Amazon S3).
//!
//! Persists uploaded documents in an S3 bucket using the S3 REST API with
//! AWS Signature V4 authentication. Listing handles pagination via
//! `ListObjectsV2` continuation tokens; custom endpoints (MinIO,
//! LocalStack) are supported with path-style addressing.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials / IAM roles)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

/// Narrow interface over the blob store holding uploaded documents.
///
/// The extractor and file-management flows depend on this trait rather
/// than the concrete S3 client, so tests can run against an in-memory
/// implementation.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// List the filenames of every stored document.
    async fn list_filenames(&self) -> Result<Vec<String>>;

    /// Fetch a stored document's raw bytes and content type.
    async fn get(&self, filename: &str) -> Result<(Vec<u8>, String)>;

    /// Store a document, returning its public URL.
    async fn put(&self, filename: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Delete a stored document.
    async fn delete(&self, filename: &str) -> Result<()>;
}

/// S3-backed [`ObjectStorage`] implementation.
pub struct S3Storage {
    config: StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Storage {
    /// Create a storage client, reading AWS credentials from the
    /// environment. Fails fast when credentials are missing so the
    /// application refuses to start against an unusable backend.
    pub fn new(config: StorageConfig) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        Ok(Self {
            config,
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Scheme + host for requests, and whether to address the bucket in
    /// the path (custom endpoints) or the hostname (real S3).
    fn endpoint(&self) -> (String, String, bool) {
        match &self.config.endpoint_url {
            Some(endpoint) => {
                let trimmed = endpoint.trim_end_matches('/');
                let (scheme, host) = match trimmed.split_once("://") {
                    Some((s, h)) => (s.to_string(), h.to_string()),
                    None => ("https".to_string(), trimmed.to_string()),
                };
                (scheme, host, true)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region),
                false,
            ),
        }
    }

    /// Issue a SigV4-signed request against the bucket.
    ///
    /// `key` is `None` for bucket-level operations (listing). The query
    /// string must be given unencoded; it is canonicalized here.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let (scheme, host, path_style) = self.endpoint();

        let mut canonical_uri = String::from("/");
        if path_style {
            canonical_uri.push_str(&uri_encode(&self.config.bucket));
            canonical_uri.push('/');
        }
        if let Some(key) = key {
            let encoded = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
            canonical_uri.push_str(&encoded);
        }

        let mut sorted_query = query.to_vec();
        sorted_query.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
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
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        Ok(req.send().await?)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn list_filenames(&self) -> Result<Vec<String>> {
        let mut filenames = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .signed_request(reqwest::Method::GET, None, &query, Vec::new(), None)
                .await
                .with_context(|| {
                    format!("Failed to list objects in s3://{}", self.config.bucket)
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml = resp.text().await?;
            let (keys, is_truncated, next_token) = parse_list_response(&xml);
            filenames.extend(keys);

            if is_truncated {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        Ok(filenames)
    }

    async fn get(&self, filename: &str) -> Result<(Vec<u8>, String)> {
        let resp = self
            .signed_request(reqwest::Method::GET, Some(filename), &[], Vec::new(), None)
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.config.bucket, filename))?;

        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for '{}'",
                resp.status(),
                filename
            );
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| content_type_for(filename).to_string());

        let bytes = resp.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }

    async fn put(&self, filename: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let resp = self
            .signed_request(
                reqwest::Method::PUT,
                Some(filename),
                &[],
                bytes,
                Some(content_type),
            )
            .await
            .with_context(|| format!("Failed to put s3://{}/{}", self.config.bucket, filename))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for '{}': {}",
                status,
                filename,
                body.chars().take(500).collect::<String>()
            );
        }

        info!(filename, "uploaded document to storage");
        Ok(format!(
            "https://{}.s3.amazonaws.com/{}",
            self.config.bucket, filename
        ))
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        let resp = self
            .signed_request(
                reqwest::Method::DELETE,
                Some(filename),
                &[],
                Vec::new(),
                None,
            )
            .await
            .with_context(|| {
                format!("Failed to delete s3://{}/{}", self.config.bucket, filename)
            })?;

        if !resp.status().is_success() {
            bail!(
                "S3 DeleteObject failed (HTTP {}) for '{}'",
                resp.status(),
                filename
            );
        }

        info!(filename, "deleted document from storage");
        Ok(())
    }
}

/// Detect a MIME content type from a filename extension.
///
/// Mirrors the upload path: PDFs keep their type, everything else is
/// treated as plain text.
pub fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("pdf") => "application/pdf",
        _ => "text/plain",
    }
}

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
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

// ============ AWS SigV4 Helpers ============

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

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a date, region, and service.
///
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

/// URI-encode a string per RFC 3986 (SigV4 canonical requests).
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

// ============ XML Parsing (minimal, no extra deps) ============

/// Parse a `ListObjectsV2` XML response into object keys plus pagination
/// state (truncation flag and next continuation token).
fn parse_list_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            // Skip directory placeholder objects.
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (keys, is_truncated, next_token)
}

/// Extract the text content of a simple, non-nested XML tag.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Artifact Object Store
 * MinIO (S3 wire protocol) adapter: SigV4-signed requests over reqwest
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::errors::{ScannerResult, StorageError};

type HmacSha256 = Hmac<Sha256>;

static LIST_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Key>([^<]+)</Key>").expect("Invalid LIST_KEY_REGEX"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode one path segment per the SigV4 canonical URI rules.
fn uri_encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(uri_encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Object-store client for scan artifacts.
///
/// Keys follow `scans/{scanId}/...`; deleting a scan removes the whole prefix
/// best-effort before the database cascade.
#[derive(Clone)]
pub struct ArtifactStore {
    client: Client,
    endpoint: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl ArtifactStore {
    pub fn new(config: &StorageConfig) -> ScannerResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn host(&self) -> String {
        self.endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string()
    }

    /// Build the SigV4 Authorization header plus the amz headers for one request.
    fn sign(
        &self,
        method: &str,
        canonical_path: &str,
        canonical_query: &str,
        payload_hash: &str,
    ) -> Vec<(String, String)> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let host = self.host();

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            host, payload_hash, amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex_encode(&hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, credential_scope, signed_headers, signature
        );

        vec![
            ("authorization".to_string(), authorization),
            ("x-amz-date".to_string(), amz_date),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ]
    }

    async fn request(
        &self,
        method: reqwest::Method,
        key_path: &str,
        query: &str,
        body: Option<Vec<u8>>,
        content_type: Option<&str>,
    ) -> ScannerResult<reqwest::Response> {
        let canonical_path = format!("/{}{}", self.bucket, key_path);
        let payload_hash = sha256_hex(body.as_deref().unwrap_or(&[]));
        let headers = self.sign(method.as_str(), &canonical_path, query, &payload_hash);

        let mut url = format!("{}{}", self.endpoint, canonical_path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(ct) = content_type {
            request = request.header("content-type", ct);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    /// Create the bucket if missing. 409 means it already exists.
    pub async fn ensure_bucket(&self) -> ScannerResult<()> {
        let response = self
            .request(reqwest::Method::PUT, "", "", None, None)
            .await?;
        match response.status().as_u16() {
            200 | 409 => {
                info!(bucket = %self.bucket, "Artifact bucket ready");
                Ok(())
            }
            status => Err(StorageError::UnexpectedStatus {
                status,
                key: self.bucket.clone(),
            }
            .into()),
        }
    }

    pub async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> ScannerResult<()> {
        let path = format!("/{}", encode_key_path(key));
        let size = data.len();
        let response = self
            .request(reqwest::Method::PUT, &path, "", Some(data), Some(content_type))
            .await?;

        if response.status().is_success() {
            debug!(key, size, "Artifact stored");
            Ok(())
        } else {
            Err(StorageError::UnexpectedStatus {
                status: response.status().as_u16(),
                key: key.to_string(),
            }
            .into())
        }
    }

    pub async fn get_object(&self, key: &str) -> ScannerResult<Vec<u8>> {
        let path = format!("/{}", encode_key_path(key));
        let response = self
            .request(reqwest::Method::GET, &path, "", None, None)
            .await?;

        match response.status().as_u16() {
            200 => Ok(response.bytes().await?.to_vec()),
            404 => Err(StorageError::ObjectNotFound {
                key: key.to_string(),
            }
            .into()),
            status => Err(StorageError::UnexpectedStatus {
                status,
                key: key.to_string(),
            }
            .into()),
        }
    }

    pub async fn delete_object(&self, key: &str) -> ScannerResult<()> {
        let path = format!("/{}", encode_key_path(key));
        let response = self
            .request(reqwest::Method::DELETE, &path, "", None, None)
            .await?;

        // S3 DELETE is idempotent: 204 for both present and absent keys.
        if response.status().is_success() || response.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(StorageError::UnexpectedStatus {
                status: response.status().as_u16(),
                key: key.to_string(),
            }
            .into())
        }
    }

    /// List object keys under a prefix (single page, up to 1000 keys).
    pub async fn list_prefix(&self, prefix: &str) -> ScannerResult<Vec<String>> {
        // Canonical query string must be sorted; these two keys already are.
        // The signed string and the sent URL must match byte for byte.
        let query = format!("list-type=2&prefix={}", uri_encode_segment(prefix));

        let response = self
            .request(reqwest::Method::GET, "", &query, None, None)
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::UnexpectedStatus {
                status: response.status().as_u16(),
                key: prefix.to_string(),
            }
            .into());
        }

        let body = response.text().await?;
        Ok(LIST_KEY_REGEX
            .captures_iter(&body)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect())
    }

    /// Delete every object under a prefix. Best-effort: individual failures
    /// are logged and skipped.
    pub async fn delete_prefix(&self, prefix: &str) -> ScannerResult<usize> {
        let keys = self.list_prefix(prefix).await?;
        let mut deleted = 0;

        for key in &keys {
            match self.delete_object(key).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(key, error = %e, "Artifact delete failed"),
            }
        }

        info!(prefix, deleted, total = keys.len(), "Artifact prefix purge");
        Ok(deleted)
    }

    /// Health probe: HEAD the bucket.
    pub async fn ping(&self) -> ScannerResult<()> {
        let response = self
            .request(reqwest::Method::HEAD, "", "", None, None)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StorageError::UnexpectedStatus {
                status: response.status().as_u16(),
                key: self.bucket.clone(),
            }
            .into())
        }
    }
}

/// Object-store key layout for one scan's artifacts.
pub mod keys {
    pub fn dom_snapshot(scan_id: &str) -> String {
        format!("scans/{}/dom-snapshot.html", scan_id)
    }

    pub fn external_script(scan_id: &str, index: usize) -> String {
        format!("scans/{}/scripts/external-script-{}.js", scan_id, index)
    }

    pub fn source_map(scan_id: &str, index: usize) -> String {
        format!("scans/{}/sourcemaps/source-map-{}.map", scan_id, index)
    }

    pub fn screenshot(scan_id: &str) -> String {
        format!("scans/{}/screenshot.png", scan_id)
    }

    pub fn network_trace(scan_id: &str) -> String {
        format!("scans/{}/network-trace.json", scan_id)
    }

    pub fn scan_prefix(scan_id: &str) -> String {
        format!("scans/{}/", scan_id)
    }
}

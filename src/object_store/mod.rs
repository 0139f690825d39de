//! S3-compatible object storage client.
//!
//! Talks to a single fixed bucket using path-style addressing (required
//! for self-hosted backends like Garage and MinIO).

mod sigv4;

use crate::config::StorageSettings;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by object storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Byte-blob storage addressed by key within one fixed bucket.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's bytes by key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Store bytes under a key. Returns the public URL of the stored object.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;

    /// Delete an object by key.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Object store client speaking the S3 REST API with Signature V4.
///
/// The API endpoint and the public endpoint are tracked separately: the
/// worker may reach the store over an internal address while the URL
/// returned from [`ObjectStore::put`] must be reachable by browsers.
pub struct S3ObjectStore {
    client: reqwest::Client,
    endpoint: String,
    public_endpoint: String,
    /// `host[:port]` of the API endpoint, as signed into each request.
    host: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3ObjectStore {
    /// Create a new client from storage settings.
    pub fn new(settings: &StorageSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        let endpoint = settings.endpoint.trim_end_matches('/').to_string();
        let public_endpoint = settings.public_endpoint.trim_end_matches('/').to_string();

        let url = reqwest::Url::parse(&endpoint)
            .with_context(|| format!("Invalid storage endpoint: {}", endpoint))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => anyhow::bail!("Storage endpoint has no host: {}", endpoint),
        };

        Ok(Self {
            client,
            endpoint,
            public_endpoint,
            host,
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
        })
    }

    /// Public URL of an object, for the eventual audio consumer.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_endpoint, self.bucket, key)
    }

    /// Build a signed request for `key` carrying `payload`.
    fn signed_request(&self, method: Method, key: &str, payload: &[u8]) -> reqwest::RequestBuilder {
        let canonical_path = format!("/{}/{}", self.bucket, sigv4::uri_encode_path(key));
        let url = format!("{}{}", self.endpoint, canonical_path);

        let payload_hash = sigv4::sha256_hex(payload);
        let keys = sigv4::SigningKeys {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            region: &self.region,
        };
        let (amz_date, authorization) = sigv4::sign_request(
            &keys,
            method.as_str(),
            &self.host,
            &canonical_path,
            &payload_hash,
            chrono::Utc::now(),
        );

        self.client
            .request(method, url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.signed_request(Method::GET, key, b"").send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "GET {} returned status {}",
                key,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        debug!(key, bytes = bytes.len(), "fetched object");
        Ok(bytes.to_vec())
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let response = self
            .signed_request(Method::PUT, key, &bytes)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "PUT {} returned status {}",
                key,
                response.status()
            )));
        }

        debug!(key, "stored object");
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let response = self.signed_request(Method::DELETE, key, b"").send().await?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "DELETE {} returned status {}",
                key,
                response.status()
            )));
        }

        debug!(key, "deleted object");
        Ok(())
    }
}

//! HTTP object storage client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use tracing::debug;
use url::Url;

use super::{BlobStore, ByteStream, StoreError};
use crate::config::RemoteStoreConfig;
use crate::{Result, UploadError};

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// User agent string for store requests.
const USER_AGENT: &str = concat!("streamload/", env!("CARGO_PKG_VERSION"));

/// Blob store speaking plain `PUT`/`DELETE` against `<endpoint>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpObjectStore {
    /// Create a client from the `[storage.remote]` configuration section.
    pub fn new(config: &RemoteStoreConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            UploadError::Config(format!(
                "invalid storage.remote.endpoint {}: {e}",
                config.endpoint
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(UploadError::Config(format!(
                "storage.remote.endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        if config.bucket.is_empty() {
            return Err(UploadError::Config(
                "storage.remote.bucket must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UploadError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            bucket: config.bucket.clone(),
            token: Some(config.token.clone()).filter(|t| !t.is_empty()),
        })
    }

    /// URL of the object stored under `key`.
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl BlobStore for HttpObjectStore {
    async fn put(&self, key: &str, body: ByteStream, size: u64) -> std::result::Result<(), StoreError> {
        let content_type = mime_guess::from_path(key).first_or_octet_stream();
        let request = self
            .client
            .put(self.object_url(key))
            .header(CONTENT_TYPE, content_type.as_ref())
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(body));

        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }

        debug!(key, status = status.as_u16(), "object uploaded");
        Ok(())
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
        let request = self.client.delete(self.object_url(key));
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(key, status = status.as_u16(), "object deleted");
            return Ok(());
        }
        Err(StoreError::Status {
            status: status.as_u16(),
            key: key.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

//! HTTP implementation of [`ObjectStorage`].
//!
//! Archives are PUT to and GET from `{base_url}/{path}`. The server is
//! expected to echo the upload's content type back on download; a missing
//! header falls back to a generic binary type.

use super::{ObjectStorage, StoredObject};
use crate::config::RemoteConfig;
use crate::error::{DossierError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use url::Url;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Object storage over plain HTTP PUT/GET.
pub struct HttpObjectStorage {
    client: Client,
    base_url: String,
}

impl HttpObjectStorage {
    /// Create a client for the storage endpoint at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        // Validate early so a bad endpoint fails at construction, not on
        // the first upload.
        Url::parse(base_url).map_err(|e| DossierError::Config {
            message: format!("Invalid object storage URL '{}': {}", base_url, e),
        })?;

        let client = Client::builder()
            .timeout(RemoteConfig::REQUEST_TIMEOUT)
            .user_agent(RemoteConfig::USER_AGENT)
            .build()
            .map_err(|e| DossierError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check if an HTTP status indicates a transient failure worth retrying.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let url = self.object_url(path);
        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| DossierError::Network {
                message: format!("PUT {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DossierError::Upload {
                path: path.to_string(),
                message: format!("Storage responded with status {}", status),
            });
        }
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<StoredObject> {
        let url = self.object_url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DossierError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DossierError::RemoteUnavailable {
                path: path.to_string(),
                message: format!("Storage responded with status {}", status),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DossierError::Network {
                message: format!("Error reading body of {}: {}", url, e),
                source: Some(e),
            })?
            .to_vec();

        Ok(StoredObject {
            bytes,
            content_type,
        })
    }
}

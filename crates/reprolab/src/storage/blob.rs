use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{validate_artifact_path, ArtifactStore, StoredArtifact};
use crate::error::StorageError;
use crate::sanitize::redact_url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const API_VERSION: &str = "7";

/// Client for a bearer-token REST blob service.
///
/// Uploads are `PUT <base_url>/<path>`; the response names the public URL.
/// Reads are plain GETs against that URL.
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutResponse {
    url: String,
    pathname: String,
    #[serde(default)]
    content_type: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, StorageError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl ArtifactStore for HttpBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredArtifact, StorageError> {
        validate_artifact_path(path)?;
        let size = bytes.len() as u64;

        let response = self
            .client
            .put(format!("{}/{}", self.base_url, path))
            .bearer_auth(self.token.expose_secret())
            .header("x-api-version", API_VERSION)
            .header("x-content-type", content_type)
            .header("x-add-random-suffix", "0")
            .header("x-allow-overwrite", "1")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Http(format!("Upload of '{}' failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status { status, body });
        }

        let parsed: PutResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Http(format!("Invalid upload response: {}", e)))?;

        log::debug!("Uploaded {} to {}", path, redact_url(&parsed.url));

        Ok(StoredArtifact {
            url: parsed.url,
            pathname: parsed.pathname,
            size,
            content_type: parsed
                .content_type
                .unwrap_or_else(|| content_type.to_string()),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            StorageError::Http(format!("Download of '{}' failed: {}", redact_url(url), e))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(StorageError::NotFound(redact_url(url)))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            _ => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| StorageError::Http(format!("Download body failed: {}", e))),
        }
    }
}

//! HTTP fetcher.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::Fetcher;
use crate::types::Sha256Hash;
use crate::version;
use crate::{HotbundleError, Result};

/// Build the HTTP client shared by manifest, module and patch requests.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(version::user_agent())
        .build()
        .map_err(|e| HotbundleError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Fetches the full module body with a GET against its URL.
#[derive(Debug, Clone)]
pub struct NetworkFetcher {
    client: reqwest::Client,
}

impl NetworkFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET `url` and return the body, failing on transport errors and
    /// non-2xx statuses.
    pub async fn get(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HotbundleError::Fetch {
                url: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HotbundleError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        response.bytes().await.map_err(|e| HotbundleError::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {e}"),
        })
    }
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    fn name(&self) -> &str {
        "network"
    }

    async fn fetch(
        &self,
        id: &str,
        _sha256: &Sha256Hash,
        url: &str,
        _file_name_override: Option<&str>,
    ) -> Result<Option<Bytes>> {
        debug!(module = %id, url = %url, "downloading module");
        self.get(url).await.map(Some)
    }
}

//! Cache transport
//!
//! Fetches signed pages from a remote over HTTP and walks its paginated
//! caches. Every page is checked on arrival: it must decode, its signature
//! must hold, and it may not carry too many entities with broken
//! fingerprints.

mod query;
pub use query::candidate_caches;
mod walk;

use tracing::{debug, trace};

use crate::api::{AddressKey, ApiResponse};
use crate::config::NetworkConfig;
use crate::error::{Result, SyncError};
use crate::verify;

/// Misses in a row before a walk gives up.
pub const MAX_CONSECUTIVE_MISSES: u32 = 3;

/// HTTP client for remote caches.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    max_page_bytes: usize,
    address_limit: usize,
}

impl Transport {
    pub fn new(network: &NetworkConfig, address_limit: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(network.connection_timeout())
            .connect_timeout(network.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            max_page_bytes: network.max_page_bytes,
            address_limit,
        })
    }

    fn url(remote: &AddressKey, path: &str) -> String {
        let host = if remote.location.contains(':') {
            format!("[{}]", remote.location)
        } else {
            remote.location.clone()
        };
        let sub = if remote.sublocation.is_empty() {
            String::new()
        } else {
            format!("{}/", remote.sublocation.trim_matches('/'))
        };
        format!("http://{}:{}/{}v0/{}", host, remote.port, sub, path)
    }

    fn offline(remote: &AddressKey, e: impl std::fmt::Display) -> SyncError {
        SyncError::PeerOffline {
            host: remote.location.clone(),
            port: remote.port,
            reason: e.to_string(),
        }
    }

    fn malformed(remote: &AddressKey, path: &str, reason: impl Into<String>) -> SyncError {
        SyncError::MalformedResponse {
            host: remote.location.clone(),
            port: remote.port,
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Liveness probe: GET /status must answer 2xx.
    pub async fn ping(&self, remote: &AddressKey) -> Result<()> {
        let response = self
            .client
            .get(Self::url(remote, "status"))
            .send()
            .await
            .map_err(|e| Self::offline(remote, e))?;
        if !response.status().is_success() {
            return Err(SyncError::Http {
                status: response.status().as_u16(),
                host: remote.location.clone(),
                port: remote.port,
                path: "status".to_string(),
            });
        }
        Ok(())
    }

    /// Fetch one page with GET, or POST when `body` is given.
    ///
    /// Connection failures and timeouts are `PeerOffline`; a non-2xx status
    /// is `Http`; anything wrong with the page itself is `MalformedResponse`.
    /// The returned page carries the node id derived from its signing key.
    pub async fn fetch_page(
        &self,
        remote: &AddressKey,
        path: &str,
        body: Option<&ApiResponse>,
    ) -> Result<ApiResponse> {
        let url = Self::url(remote, path);
        trace!(%url, post = body.is_some(), "Fetching page");

        let request = match body {
            Some(body) => self.client.post(&url).json(body),
            None => self.client.get(&url),
        };
        let response = request.send().await.map_err(|e| Self::offline(remote, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "Page fetch failed");
            return Err(SyncError::Http {
                status: status.as_u16(),
                host: remote.location.clone(),
                port: remote.port,
                path: path.to_string(),
            });
        }
        if response
            .content_length()
            .is_some_and(|len| len as usize > self.max_page_bytes)
        {
            return Err(Self::malformed(remote, path, "page exceeds size limit"));
        }

        let bytes = response.bytes().await.map_err(|e| Self::offline(remote, e))?;
        if bytes.len() > self.max_page_bytes {
            return Err(Self::malformed(remote, path, "page exceeds size limit"));
        }
        self.check_page(remote, path, &bytes)
    }

    fn check_page(&self, remote: &AddressKey, path: &str, bytes: &[u8]) -> Result<ApiResponse> {
        let mut page: ApiResponse = serde_json::from_slice(bytes)
            .map_err(|e| Self::malformed(remote, path, format!("undecodable page: {}", e)))?;

        page.node_id = verify::verify_page(&page)
            .map_err(|e| Self::malformed(remote, path, e.to_string()))?;

        let broken = verify::fingerprint_failures(&page.response);
        if broken >= verify::PAGE_FINGERPRINT_TOLERANCE {
            return Err(Self::malformed(
                remote,
                path,
                format!("{} entities with invalid fingerprints", broken),
            ));
        }
        Ok(page)
    }
}

/// Tracks consecutive misses during a walk.
#[derive(Debug, Default)]
pub(crate) struct MissCounter {
    misses: u32,
}

impl MissCounter {
    pub(crate) fn hit(&mut self) {
        self.misses = 0;
    }

    /// Record a miss. Returns whether the walk should give up.
    pub(crate) fn miss(&mut self) -> bool {
        self.misses += 1;
        self.misses >= MAX_CONSECUTIVE_MISSES
    }

    pub(crate) fn count(&self) -> u32 {
        self.misses
    }
}

//! Paginated walks over caches, endpoint indexes and live replies

use tracing::{debug, warn};

use super::{MissCounter, Transport};
use crate::api::{AddressKey, ApiResponse, Endpoint, Response, ResultCache, Timestamp};
use crate::error::{Result, SyncError};

impl Transport {
    fn full(&self, acc: &Response) -> bool {
        acc.body.addresses.len() >= self.address_limit
    }

    fn gave_up(location: &str, misses: u32, partial: Response) -> SyncError {
        SyncError::ConsecutiveMissesExceeded {
            location: location.to_string(),
            misses,
            partial: Box::new(partial),
        }
    }

    /// Walk every page of one cache. `cache` is the path of the cache
    /// directory, e.g. `c0/posts/<cache>`.
    ///
    /// Page 0 gives the page count. Missing pages are skipped until three in
    /// a row are missing, at which point the pages collected so far come back
    /// inside the error.
    pub async fn walk_cache(&self, remote: &AddressKey, cache: &str) -> Result<Response> {
        let first = self
            .fetch_page(remote, &format!("{}/0.json", cache), None)
            .await?;
        let pages = first.pagination.pages;

        let mut acc = Response::default();
        acc.absorb_page(first);

        let mut misses = MissCounter::default();
        for n in 1..pages {
            if self.full(&acc) {
                debug!(cache, "Address limit reached, stopping walk");
                break;
            }
            match self
                .fetch_page(remote, &format!("{}/{}.json", cache, n), None)
                .await
            {
                Ok(page) => {
                    misses.hit();
                    acc.absorb_page(page);
                }
                Err(e) if e.is_miss() => {
                    debug!(cache, page = n, error = %e, "Missing page");
                    if misses.miss() {
                        warn!(cache, page = n, "Too many missing pages, giving up");
                        return Err(Self::gave_up(cache, misses.count(), acc));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(acc)
    }

    /// Walk a set of caches, folding partial results of caches that gave up
    /// into the accumulation. Three failing caches in a row end the walk.
    ///
    /// A walk that skipped anything still comes back as
    /// `ConsecutiveMissesExceeded` carrying everything collected, so the
    /// caller can keep the data without trusting it as complete.
    async fn walk_caches(
        &self,
        remote: &AddressKey,
        location: &str,
        caches: Vec<String>,
        mut acc: Response,
    ) -> Result<Response> {
        let mut misses = MissCounter::default();
        let mut skipped = 0;
        for cache in caches {
            if self.full(&acc) {
                break;
            }
            match self.walk_cache(remote, &cache).await {
                Ok(resp) => {
                    misses.hit();
                    acc.merge(resp);
                }
                Err(SyncError::ConsecutiveMissesExceeded { partial, .. }) => {
                    acc.merge(*partial);
                    skipped += 1;
                    if misses.miss() {
                        return Err(Self::gave_up(location, misses.count(), acc));
                    }
                }
                Err(e) if e.is_miss() => {
                    debug!(%cache, error = %e, "Missing cache");
                    skipped += 1;
                    if misses.miss() {
                        warn!(location, "Too many missing caches, giving up");
                        return Err(Self::gave_up(location, misses.count(), acc));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        if skipped > 0 {
            debug!(location, skipped, "Walk incomplete");
            return Err(Self::gave_up(location, skipped, acc));
        }
        Ok(acc)
    }

    /// Read an endpoint's cache index.
    pub async fn endpoint_index(
        &self,
        remote: &AddressKey,
        endpoint: Endpoint,
    ) -> Result<ApiResponse> {
        self.fetch_page(remote, &format!("{}/index.json", endpoint.path()), None)
            .await
    }

    /// Walk every cache of an endpoint that ends at or after `since`.
    pub async fn walk_endpoint(
        &self,
        remote: &AddressKey,
        endpoint: Endpoint,
        since: Timestamp,
    ) -> Result<Response> {
        let index = self.endpoint_index(remote, endpoint).await?;
        let path = endpoint.path();

        let caches: Vec<String> = index
            .results
            .iter()
            .filter(|c| c.ends_at >= since)
            .map(|c| format!("{}/{}", path, c.response_url))
            .collect();
        debug!(
            %endpoint,
            total = index.results.len(),
            selected = caches.len(),
            since,
            "Walking endpoint"
        );

        let acc = Response {
            most_recent_source_timestamp: index.timestamp,
            ..Default::default()
        };
        self.walk_caches(remote, &path, caches, acc).await
    }

    /// POST a signed delta request and collect the reply: the inline body
    /// plus every linked result cache newer than `since`.
    pub async fn walk_live(
        &self,
        remote: &AddressKey,
        endpoint: Endpoint,
        request: &ApiResponse,
        since: Timestamp,
    ) -> Result<Response> {
        let path = endpoint.path();
        let reply = self.fetch_page(remote, &path, Some(request)).await?;

        let caches: Vec<String> = reply
            .results
            .iter()
            .filter(|c: &&ResultCache| c.ends_at > since)
            .map(|c| format!("responses/{}", c.response_url))
            .collect();

        let mut acc = Response::default();
        acc.absorb_page(reply);
        if caches.is_empty() {
            return Ok(acc);
        }
        debug!(%endpoint, caches = caches.len(), "Live reply points at result caches");
        self.walk_caches(remote, &path, caches, acc).await
    }
}

//! Targeted lookups
//!
//! Finding a single entity on a remote without downloading whole caches:
//! narrow the cache list by timestamp hints, resolve the page through the
//! cache's index, then fetch that one page.

use tracing::debug;

use super::{MissCounter, Transport};
use crate::api::{AddressKey, Endpoint, Entity, EntityKind, Response, ResultCache, Timestamp};
use crate::error::{Result, SyncError};

/// Caches worth searching for an entity with these hints. Zero means the
/// hint is unknown; with no hints at all every cache is a candidate.
pub fn candidate_caches(
    caches: &[ResultCache],
    kind: EntityKind,
    creation: Timestamp,
    last_update: Timestamp,
) -> Vec<ResultCache> {
    let use_update = kind.is_updateable() && last_update != 0;
    if creation == 0 && !use_update {
        return caches.to_vec();
    }
    caches
        .iter()
        .filter(|c| (creation != 0 && c.covers(creation)) || (use_update && c.covers(last_update)))
        .cloned()
        .collect()
}

impl Transport {
    /// Find one entity in a cache. With a known page number only that page
    /// is fetched; otherwise pages are scanned from 0 until a match.
    pub async fn lookup_by_fingerprint(
        &self,
        remote: &AddressKey,
        cache: &str,
        page: Option<u64>,
        fingerprint: &str,
        kind: EntityKind,
    ) -> Result<Option<Entity>> {
        if let Some(n) = page {
            let page = self
                .fetch_page(remote, &format!("{}/{}.json", cache, n), None)
                .await?;
            return Ok(page.response.find(kind, fingerprint));
        }

        let first = self
            .fetch_page(remote, &format!("{}/0.json", cache), None)
            .await?;
        if let Some(found) = first.response.find(kind, fingerprint) {
            return Ok(Some(found));
        }

        let mut misses = MissCounter::default();
        for n in 1..first.pagination.pages {
            match self
                .fetch_page(remote, &format!("{}/{}.json", cache, n), None)
                .await
            {
                Ok(page) => {
                    misses.hit();
                    if let Some(found) = page.response.find(kind, fingerprint) {
                        return Ok(Some(found));
                    }
                }
                Err(e) if e.is_miss() => {
                    if misses.miss() {
                        return Err(SyncError::ConsecutiveMissesExceeded {
                            location: cache.to_string(),
                            misses: misses.count(),
                            partial: Box::default(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Resolve the page an entity lives on through the cache's index pages.
    /// `Ok(None)` means the index does not list it.
    async fn resolve_page(
        &self,
        remote: &AddressKey,
        cache: &str,
        fingerprint: &str,
        kind: EntityKind,
    ) -> Result<Option<u64>> {
        let mut n = 0;
        loop {
            let page = self
                .fetch_page(remote, &format!("{}/index/{}.json", cache, n), None)
                .await?;
            if let Some(entry) = page
                .response
                .index(kind)
                .iter()
                .find(|e| e.fingerprint == fingerprint)
            {
                return Ok(Some(entry.page_number));
            }
            n += 1;
            if n >= page.pagination.pages {
                return Ok(None);
            }
        }
    }

    /// Look an entity up on a remote by fingerprint, narrowing the search
    /// with its creation and last-update timestamps when known.
    pub async fn query(
        &self,
        remote: &AddressKey,
        kind: EntityKind,
        fingerprint: &str,
        creation: Timestamp,
        last_update: Timestamp,
    ) -> Result<Response> {
        let endpoint = Endpoint::Content(kind);
        let index = self.endpoint_index(remote, endpoint).await?;
        let candidates = candidate_caches(&index.results, kind, creation, last_update);
        debug!(
            entity = %kind,
            fingerprint,
            candidates = candidates.len(),
            "Querying remote"
        );

        let mut out = Response::default();
        for cache in candidates {
            let cache_path = format!("{}/{}", endpoint.path(), cache.response_url);
            let page = match self.resolve_page(remote, &cache_path, fingerprint, kind).await {
                Ok(Some(n)) => Some(n),
                Ok(None) => continue,
                // No usable index: scan the cache instead.
                Err(e) if e.is_miss() => None,
                Err(e) => return Err(e),
            };
            match self
                .lookup_by_fingerprint(remote, &cache_path, page, fingerprint, kind)
                .await
            {
                Ok(Some(entity)) => out.body.push(entity),
                Ok(None) => {}
                Err(e) if e.is_miss() || matches!(e, SyncError::ConsecutiveMissesExceeded { .. }) => {
                    debug!(cache = %cache_path, error = %e, "Lookup missed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

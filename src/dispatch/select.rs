//! Candidate selection and the pinger

use futures::future::join_all;
use rand::seq::SliceRandom;
use tracing::{debug, trace};

use super::Dispatcher;
use crate::api::Address;
use crate::error::Result;
use crate::identity::now;
use crate::store::{AddressFilter, AddressOrder};

/// Which online peers a selection should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Any,
    /// Never-synced peers when there are any, else any
    PreferUnsynced,
    /// Only this address type
    Type(u8),
}

impl Dispatcher {
    /// Check each address, a page at a time with the checks of a page
    /// running concurrently. Reachable ones come back with a fresh
    /// `last_successful_ping` and are written back as first-party records.
    pub async fn ping(&self, addresses: Vec<Address>) -> Result<Vec<Address>> {
        let page_size = self.config.dispatch.pinger_page_size.max(1);
        let mut online = Vec::new();

        for page in addresses.chunks(page_size) {
            let checks = page.iter().map(|a| self.syncer.check(a));
            for (address, result) in page.iter().zip(join_all(checks).await) {
                match result {
                    Ok(checked) => {
                        let mut fresh = checked.address;
                        fresh.last_successful_ping = now();
                        online.push(fresh);
                    }
                    Err(e) => trace!(peer = %address.key(), error = %e, "Ping failed"),
                }
            }
        }

        if !online.is_empty() {
            self.syncer.store.insert_or_update_addresses(&online)?;
        }
        debug!(checked = addresses.len(), online = online.len(), "Ping pass finished");
        Ok(online)
    }

    /// Up to `count` peers that are online right now and not on cooldown.
    ///
    /// Candidates are read freshest first, filtered, then pinged a page at a
    /// time until enough answer. Only peers that answered after the scan
    /// started count, so a stale liveness flag is never trusted.
    pub async fn find_online_nodes(&self, count: usize, selection: Selection) -> Result<Vec<Address>> {
        let started = now();
        let filter = AddressFilter {
            address_type: match selection {
                Selection::Type(t) => Some(t),
                _ => None,
            },
            order: AddressOrder::Freshest,
            limit: None,
        };
        let candidates: Vec<Address> = {
            let all = self.syncer.store.read_addresses(&filter)?;
            let state = self.state();
            all.into_iter()
                .filter(|a| !state.exclusions.is_excluded(&a.key(), started))
                .collect()
        };

        let page_size = self.config.dispatch.pinger_page_size.max(1);
        let mut online = Vec::new();
        for page in candidates.chunks(page_size) {
            let answered = self.ping(page.to_vec()).await?;
            online.extend(
                answered
                    .into_iter()
                    .filter(|a| a.last_successful_ping >= started),
            );
            let satisfied = match selection {
                Selection::PreferUnsynced => {
                    online.iter().filter(|a| a.last_successful_sync == 0).count() >= count
                }
                _ => online.len() >= count,
            };
            if satisfied {
                break;
            }
        }

        Ok(pick(online, count, selection))
    }
}

/// Random choice of up to `count` from the online set.
pub fn pick(online: Vec<Address>, count: usize, selection: Selection) -> Vec<Address> {
    let mut pool = online;
    if selection == Selection::PreferUnsynced {
        let unsynced: Vec<Address> = pool
            .iter()
            .filter(|a| a.last_successful_sync == 0)
            .cloned()
            .collect();
        if !unsynced.is_empty() {
            pool = unsynced;
        }
    }
    let mut rng = rand::thread_rng();
    pool.shuffle(&mut rng);
    pool.truncate(count);
    pool
}

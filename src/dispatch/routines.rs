//! The periodic dispatch routines

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{Dispatcher, Selection};
use crate::api::{address_type, Address, Endpoint, EntityKind};
use crate::error::{Result, SyncError};
use crate::identity::now;
use crate::store::{AddressFilter, AddressOrder};
use crate::sync::check::overwrite_first_party;
use crate::sync::pull::third_party;

/// Live bootstrappers revisited by Explore on its rarest tick.
const EXPLORE_LIVE_BOOTSTRAPPERS: usize = 3;
const EXPLORE_STATIC_BOOTSTRAPPERS: usize = 1;

impl Dispatcher {
    /// Sync the next neighbour that is off cooldown. A neighbour that syncs
    /// goes back on the end of the list; one that fails drops off it.
    pub async fn neighbour_watch(&self) -> Result<()> {
        let next = {
            let now = now();
            let mut state = self.state();
            let mut picked = None;
            for _ in 0..state.neighbours.len() {
                let Some(candidate) = state.neighbours.pop_front() else {
                    break;
                };
                if state.exclusions.is_excluded(&candidate.key(), now) {
                    state.neighbours.push_back(candidate);
                } else {
                    picked = Some(candidate);
                    break;
                }
            }
            picked
        };

        let Some(neighbour) = next else {
            debug!("No neighbour available, scouting");
            return self.scout().await;
        };

        match self.sync_with(&neighbour, &Endpoint::all()).await {
            // A neighbour synced elsewhere in the meantime stays on the list.
            Ok(_) | Err(SyncError::CoolingDown(_)) => {
                self.push_neighbour(neighbour);
                Ok(())
            }
            Err(e) => {
                debug!(peer = %neighbour.key(), error = %e, "Neighbour dropped");
                Err(e)
            }
        }
    }

    /// Sync one online peer, never-synced ones first. With nobody online the
    /// address table is rescanned so the next attempt has fresher data.
    pub async fn scout(&self) -> Result<()> {
        let found = self.find_online_nodes(1, Selection::PreferUnsynced).await?;
        let Some(target) = found.into_iter().next() else {
            info!("Scout found no online peer, scanning addresses");
            self.address_scanner().await?;
            return Ok(());
        };

        match self.sync_with(&target, &Endpoint::all()).await {
            Ok(_) => {
                self.push_neighbour(target);
                Ok(())
            }
            Err(SyncError::CoolingDown(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Most ticks scout. Every `explore_static_every` ticks all static peers
    /// are re-synced, and every `explore_bootstrap_every` ticks a few
    /// bootstrappers are.
    pub async fn explore(&self) -> Result<()> {
        let tick = {
            let mut state = self.state();
            state.explore_ticks += 1;
            state.explore_ticks
        };
        let d = &self.config.dispatch;

        if tick % d.explore_bootstrap_every.max(1) == 0 {
            debug!(tick, "Explore: bootstrappers");
            let mut targets = self
                .find_online_nodes(
                    EXPLORE_LIVE_BOOTSTRAPPERS,
                    Selection::Type(address_type::LIVE_BOOTSTRAP),
                )
                .await?;
            targets.extend(
                self.find_online_nodes(
                    EXPLORE_STATIC_BOOTSTRAPPERS,
                    Selection::Type(address_type::STATIC_BOOTSTRAP),
                )
                .await?,
            );
            self.sync_all(&targets, &Endpoint::all(), false).await
        } else if tick % d.explore_static_every.max(1) == 0 {
            debug!(tick, "Explore: static peers");
            let targets = self
                .find_online_nodes(usize::MAX, Selection::Type(address_type::STATIC))
                .await?;
            self.sync_all(&targets, &Endpoint::all(), false).await
        } else {
            self.scout().await
        }
    }

    /// Sync each target in turn. Peer failures are logged and skipped; only
    /// a local store failure stops the run.
    async fn sync_all(
        &self,
        targets: &[Address],
        lineup: &[Endpoint],
        through_cooldown: bool,
    ) -> Result<()> {
        for target in targets {
            let result = if through_cooldown {
                self.sync_through_cooldown(target, lineup).await
            } else {
                self.sync_with(target, lineup).await
            };
            match result {
                Ok(_) => {}
                Err(e @ (SyncError::Store(_) | SyncError::StoreCorruption(_))) => return Err(e),
                Err(e) => debug!(peer = %target.key(), error = %e, "Sync skipped"),
            }
        }
        Ok(())
    }

    /// Cold start. Runs when nothing has connected for longer than the
    /// offline threshold, or when forced.
    ///
    /// The content kinds are dealt round-robin across the online
    /// bootstrappers for a first, type-scoped pass. A second pass then
    /// full-syncs every one of them so the result is the union of their
    /// data.
    pub async fn bootstrap(&self, force: bool) -> Result<()> {
        let started = now();
        let last_contact = {
            let state = self.state();
            state
                .last_bootstrap
                .max(state.connections.live)
                .max(state.connections.bootstrap)
        };
        let threshold = (self.config.dispatch.bootstrap_after_offline_mins * 60) as i64;
        if !force && last_contact > 0 && started - last_contact < threshold {
            debug!(last_contact, "Recently connected, bootstrap not needed");
            return Ok(());
        }

        let discovered = self.discover_bootstrappers().await?;
        if discovered.is_empty() {
            warn!("No bootstrappers known");
            return Ok(());
        }
        let third: Vec<Address> = discovered.iter().cloned().map(third_party).collect();
        self.syncer.store.batch_insert(&[], &third)?;

        let online = self.ping(discovered).await?;
        if online.is_empty() {
            warn!("No bootstrapper answered");
            return Ok(());
        }
        info!(bootstrappers = online.len(), "Bootstrapping");

        for (target, kinds) in online.iter().zip(partition(&EntityKind::ALL, online.len())) {
            let mut lineup = vec![Endpoint::Addresses];
            lineup.extend(kinds.into_iter().map(Endpoint::Content));
            if let Err(e) = self.sync_with(target, &lineup).await {
                debug!(peer = %target.key(), error = %e, "Type-scoped bootstrap sync failed");
            }
        }
        self.sync_all(&online, &Endpoint::all(), true).await?;

        self.state().last_bootstrap = now();
        info!(
            bootstrappers = online.len(),
            duration_secs = now() - started,
            "Bootstrap complete"
        );
        Ok(())
    }

    /// The configured bootstrapper's list, with the bootstrapper itself
    /// first when it is one. Without a configured bootstrapper the stored
    /// bootstrap addresses are used.
    async fn discover_bootstrappers(&self) -> Result<Vec<Address>> {
        let limit = self.config.dispatch.bootstrapper_limit;
        let Some(configured) = &self.config.node.bootstrapper else {
            let mut known = self
                .syncer
                .store
                .read_addresses(&AddressFilter::of_type(address_type::LIVE_BOOTSTRAP))?;
            known.extend(
                self.syncer
                    .store
                    .read_addresses(&AddressFilter::of_type(address_type::STATIC_BOOTSTRAP))?,
            );
            known.truncate(limit);
            return Ok(known);
        };

        let dialed = parse_host_port(configured)?;
        let page = self
            .syncer
            .transport
            .fetch_page(&dialed.key(), "bootstrappers", None)
            .await?;

        let mut found = Vec::new();
        if page.address.is_bootstrapper() {
            let mut own = page.address.clone();
            overwrite_first_party(&mut own, &dialed);
            found.push(own);
        }
        found.extend(
            page.response
                .addresses
                .into_iter()
                .filter(|a| a.is_bootstrapper() && !a.location.is_empty()),
        );

        let mut seen = HashSet::new();
        found.retain(|a| seen.insert(a.key()));
        found.truncate(limit);
        debug!(bootstrapper = %configured, found = found.len(), "Bootstrappers discovered");
        Ok(found)
    }

    /// Re-ping every known address, stalest first. Skipped when a scan is
    /// already running. Returns how many answered.
    pub async fn address_scanner(&self) -> Result<usize> {
        let Ok(_scan) = self.scan_lock.try_lock() else {
            debug!("Address scan already running");
            return Ok(0);
        };

        let filter = AddressFilter {
            order: AddressOrder::Stalest,
            ..Default::default()
        };
        let known = self.syncer.store.read_addresses(&filter)?;
        let total = known.len();
        let online = self.ping(known).await?;
        info!(total, online = online.len(), "Address scan complete");
        Ok(online.len())
    }
}

/// Parse a `host:port` bootstrapper. IPv6 hosts are written bracketed.
pub fn parse_host_port(input: &str) -> Result<Address> {
    let bad = || SyncError::Config(format!("bootstrapper must be host:port, got {:?}", input));
    let (host, port) = input.trim().rsplit_once(':').ok_or_else(bad)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port: u16 = port.parse().map_err(|_| bad())?;
    if host.is_empty() || port == 0 {
        return Err(bad());
    }
    Ok(Address::new(host, port))
}

/// Deal `kinds` round-robin over `n` buckets.
pub fn partition(kinds: &[EntityKind], n: usize) -> Vec<Vec<EntityKind>> {
    let mut buckets = vec![Vec::new(); n];
    if n == 0 {
        return buckets;
    }
    for (i, kind) in kinds.iter().enumerate() {
        buckets[i % n].push(*kind);
    }
    buckets
}

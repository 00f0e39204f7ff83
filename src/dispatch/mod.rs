//! Dispatch scheduler
//!
//! Decides who to sync with and when. Routines:
//!
//! - **NeighbourWatch**: sync the next peer on the rolling neighbour list
//! - **Scout**: sync an online peer, preferring ones never synced before
//! - **Explore**: mostly Scout; periodically all static peers, and more
//!   rarely a handful of bootstrappers
//! - **Bootstrap**: on cold start, spread the content kinds across live
//!   bootstrappers, then full-sync each of them
//! - **AddressScanner**: re-ping every known address, stalest first
//!
//! Only one sync runs at a time. The dispatcher owns that lock and puts the
//! synced address on cooldown before releasing it.

pub mod exclusion;
pub mod routines;
pub mod schedule;
pub mod select;

pub use exclusion::ExclusionList;
pub use schedule::ScheduledTask;
pub use select::Selection;

use std::collections::VecDeque;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{address_type, Address, Endpoint, Timestamp};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::identity::now;
use crate::sync::{ReportHistory, SyncReport, Syncer};

/// Last successful connection per class of peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionTimestamps {
    pub live: Timestamp,
    pub static_node: Timestamp,
    pub bootstrap: Timestamp,
}

impl ConnectionTimestamps {
    pub fn record(&mut self, address_type: u8, at: Timestamp) {
        match address_type {
            address_type::LIVE => self.live = at,
            address_type::LIVE_BOOTSTRAP | address_type::STATIC_BOOTSTRAP => self.bootstrap = at,
            address_type::STATIC => self.static_node = at,
            _ => {}
        }
    }
}

/// Bookkeeping shared by the routines. Only touched in short critical
/// sections, never across an await.
#[derive(Debug)]
pub struct DispatchState {
    pub exclusions: ExclusionList,
    pub neighbours: VecDeque<Address>,
    pub explore_ticks: u64,
    pub connections: ConnectionTimestamps,
    pub last_bootstrap: Timestamp,
    pub history: ReportHistory,
}

pub struct Dispatcher {
    pub(crate) syncer: Syncer,
    pub(crate) config: Arc<Config>,
    sync_lock: Mutex<()>,
    pub(crate) scan_lock: Mutex<()>,
    state: std::sync::Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(syncer: Syncer, config: Arc<Config>) -> Self {
        let dispatch = &config.dispatch;
        let state = DispatchState {
            exclusions: ExclusionList::new(dispatch.live_exclusion_secs, dispatch.static_exclusion_secs),
            neighbours: VecDeque::with_capacity(dispatch.neighbour_count),
            explore_ticks: 0,
            connections: ConnectionTimestamps::default(),
            last_bootstrap: 0,
            history: ReportHistory::new(100),
        };
        Self {
            syncer,
            config,
            sync_lock: Mutex::new(()),
            scan_lock: Mutex::new(()),
            state: std::sync::Mutex::new(state),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn syncer(&self) -> &Syncer {
        &self.syncer
    }

    pub fn connections(&self) -> ConnectionTimestamps {
        self.state().connections
    }

    pub fn recent_reports(&self, n: usize) -> Vec<SyncReport> {
        self.state().history.recent(n)
    }

    pub fn is_excluded(&self, address: &Address) -> bool {
        self.state().exclusions.is_excluded(&address.key(), now())
    }

    /// Sync with one peer under the process-wide sync lock. The address
    /// goes on cooldown whatever the outcome, before the lock is released.
    ///
    /// Fails with `CoolingDown` when the address went on cooldown while this
    /// call waited for the lock.
    pub async fn sync_with(&self, address: &Address, lineup: &[Endpoint]) -> Result<SyncReport> {
        self.locked_sync(address, lineup, false).await
    }

    /// Sync with one peer even if it is on cooldown. Used by bootstrap's
    /// second pass, which revisits peers it has just synced.
    pub(crate) async fn sync_through_cooldown(
        &self,
        address: &Address,
        lineup: &[Endpoint],
    ) -> Result<SyncReport> {
        self.locked_sync(address, lineup, true).await
    }

    async fn locked_sync(
        &self,
        address: &Address,
        lineup: &[Endpoint],
        ignore_cooldown: bool,
    ) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        if !ignore_cooldown && self.is_excluded(address) {
            debug!(peer = %address.key(), "Still cooling down, sync skipped");
            return Err(SyncError::CoolingDown(address.key().to_string()));
        }
        let result = self.syncer.sync(address, lineup).await;

        let finished = now();
        let mut state = self.state();
        state.exclusions.exclude(address, finished);
        state.exclusions.purge_expired(finished);
        if let Ok(report) = &result {
            state.connections.record(report.address_type, finished);
            state.history.record(report.clone());
        }
        result
    }

    /// Keep a synced peer on the rolling neighbour list.
    pub(crate) fn push_neighbour(&self, address: Address) {
        let limit = self.config.dispatch.neighbour_count;
        let mut state = self.state();
        state.neighbours.retain(|a| !a.same_as(&address));
        state.neighbours.push_back(address);
        while state.neighbours.len() > limit {
            state.neighbours.pop_front();
        }
    }

    /// Spawn the periodic routines. Bootstrap runs once shortly after start.
    pub fn start(self: Arc<Self>) -> Vec<ScheduledTask> {
        let d = &self.config.dispatch;
        let mut tasks = Vec::new();

        let me = self.clone();
        tasks.push(ScheduledTask::spawn(
            "bootstrap",
            Duration::from_secs(1),
            Duration::from_secs(d.bootstrap_after_offline_mins.max(1) * 60),
            move || {
                let me = me.clone();
                async move {
                    if let Err(e) = me.bootstrap(false).await {
                        debug!(error = %e, "Bootstrap did not run");
                    }
                }
            },
        ));

        let me = self.clone();
        tasks.push(ScheduledTask::spawn(
            "neighbour_watch",
            Duration::from_secs(30),
            Duration::from_secs(d.neighbour_watch_interval_secs),
            move || {
                let me = me.clone();
                async move {
                    if let Err(e) = me.neighbour_watch().await {
                        debug!(error = %e, "NeighbourWatch finished with error");
                    }
                }
            },
        ));

        let me = self.clone();
        tasks.push(ScheduledTask::spawn(
            "explore",
            Duration::from_secs(d.explore_interval_secs),
            Duration::from_secs(d.explore_interval_secs),
            move || {
                let me = me.clone();
                async move {
                    if let Err(e) = me.explore().await {
                        debug!(error = %e, "Explore finished with error");
                    }
                }
            },
        ));

        let me = self.clone();
        tasks.push(ScheduledTask::spawn(
            "address_scanner",
            Duration::from_secs(60),
            Duration::from_secs(d.address_scan_interval_secs),
            move || {
                let me = me.clone();
                async move {
                    if let Err(e) = me.address_scanner().await {
                        debug!(error = %e, "Address scan finished with error");
                    }
                }
            },
        ));

        tasks
    }
}

//! Event horizon
//!
//! Keeps the local store inside its size budget by deleting content that
//! nobody has referenced for a while. The horizon is the moving cutoff: it
//! rests at the local memory cutoff and only creeps toward the present,
//! a day per step, while the database stays over budget.
//!
//! Addresses are never pruned here; the store caps their count instead.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::api::{EntityKind, Timestamp};
use crate::config::RetentionConfig;
use crate::identity::now;
use crate::store::Store;

pub const DAY: i64 = 24 * 3600;
const MB: u64 = 1024 * 1024;

/// What one prune pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub horizon: Timestamp,
    /// Day-sized steps taken toward the present
    pub steps: u32,
    pub removed: usize,
    pub size_bytes: u64,
}

pub struct EventHorizon {
    store: Arc<dyn Store>,
    retention: RetentionConfig,
    horizon: Arc<AtomicI64>,
}

impl EventHorizon {
    /// Starts at the local memory cutoff.
    pub fn new(store: Arc<dyn Store>, retention: RetentionConfig) -> Self {
        let start = now() - days(retention.local_memory_days);
        Self {
            store,
            retention,
            horizon: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Shared view of the horizon, read by the syncer's purgatory.
    pub fn handle(&self) -> Arc<AtomicI64> {
        self.horizon.clone()
    }

    pub fn current(&self) -> Timestamp {
        self.horizon.load(Ordering::Relaxed)
    }

    pub fn prune_db(&self) -> Result<PruneOutcome> {
        self.prune_at(now())
    }

    /// One pass of the control loop as of `now`.
    pub fn prune_at(&self, now: Timestamp) -> Result<PruneOutcome> {
        let local_cutoff = now - days(self.retention.local_memory_days);
        let votes_cutoff = now - days(self.retention.votes_memory_days);
        // Content inside the network head is never pruned for space.
        let floor = (now - days(self.retention.network_head_days)).max(local_cutoff);
        let budget = self.retention.max_db_size_mb * MB;

        let mut horizon = self.current().max(local_cutoff);
        let mut outcome = PruneOutcome::default();

        if horizon <= local_cutoff {
            outcome.removed += self.delete_before(local_cutoff, votes_cutoff)?;
        }

        let mut size = self.store.size_bytes()?;
        if size <= budget {
            horizon = local_cutoff;
        }
        while size > budget && horizon + DAY <= floor {
            horizon += DAY;
            outcome.steps += 1;
            outcome.removed += self.delete_before(horizon, votes_cutoff.max(horizon))?;
            size = self.store.size_bytes()?;
        }
        if size > budget {
            warn!(
                size_mb = size / MB,
                budget_mb = self.retention.max_db_size_mb,
                "Database still over budget at the horizon floor"
            );
        }

        self.horizon.store(horizon, Ordering::Relaxed);
        outcome.horizon = horizon;
        outcome.size_bytes = size;

        if outcome.steps > 0 || outcome.removed > 0 {
            info!(
                horizon,
                steps = outcome.steps,
                removed = outcome.removed,
                size_mb = size / MB,
                "Event horizon pass"
            );
        } else {
            debug!(horizon, size_mb = size / MB, "Event horizon unchanged");
        }
        Ok(outcome)
    }

    fn delete_before(&self, content_cutoff: Timestamp, votes_cutoff: Timestamp) -> Result<usize> {
        let mut removed = 0;
        for kind in EntityKind::ALL {
            let cutoff = if kind == EntityKind::Vote {
                votes_cutoff
            } else {
                content_cutoff
            };
            removed += self.store.prune(kind, cutoff)?;
        }
        Ok(removed)
    }
}

fn days(n: u64) -> i64 {
    n as i64 * DAY
}

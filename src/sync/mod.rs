//! Sync engine: one full interaction with one peer
//!
//! `Unchecked -> Checked -> Pulling -> Checkpointed -> Done | Failed`
//!
//! - Check: liveness probe and identity handshake ([`check`])
//! - Pull: per-endpoint GET of cached history plus, for live peers, a POST
//!   for the live delta, with monotonic checkpoints ([`pull`])
//! - Checkpointed: out-of-window entities waiting on an ancestor are
//!   released or dropped ([`purgatory`])

pub mod check;
pub mod pull;
pub mod purgatory;
pub mod report;

pub use check::Checked;
pub use purgatory::Purgatory;
pub use report::{ReportHistory, SyncReport};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::api::Timestamp;
use crate::config::Config;
use crate::identity::Identity;
use crate::store::Store;
use crate::transport::Transport;

/// Runs syncs against peers. Holds no per-peer state; exclusivity is the
/// dispatcher's job.
#[derive(Clone)]
pub struct Syncer {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) identity: Arc<Identity>,
    pub(crate) transport: Transport,
    horizon: Arc<AtomicI64>,
}

impl Syncer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        identity: Arc<Identity>,
        transport: Transport,
        horizon: Arc<AtomicI64>,
    ) -> Self {
        Self {
            config,
            store,
            identity,
            transport,
            horizon,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Current event horizon; older content goes through purgatory.
    pub fn event_horizon(&self) -> Timestamp {
        self.horizon.load(Ordering::Relaxed)
    }
}

//! Liveness probe and identity handshake

use tracing::debug;

use super::Syncer;
use crate::api::address::location_type_of;
use crate::api::{Address, AddressKey};
use crate::error::{Result, SyncError};
use crate::identity::now;

/// Outcome of a successful check.
#[derive(Debug, Clone)]
pub struct Checked {
    /// The peer's record, with how we reached it overwritten by what we
    /// actually dialed
    pub address: Address,
    pub node_id: String,
    pub is_static: bool,
}

impl Syncer {
    /// Probe `/status`, read `/node`, and for live peers present ourselves.
    pub async fn check(&self, target: &Address) -> Result<Checked> {
        let remote = target.key();
        self.transport.ping(&remote).await?;

        let node_page = self.transport.fetch_page(&remote, "node", None).await?;
        self.reject_loopback(&remote, &node_page.node_id)?;

        let is_static = node_page.address.is_static();
        let (mut address, node_id, pinged_at) = if is_static {
            let ts = node_page.timestamp;
            (node_page.address, node_page.node_id, ts)
        } else {
            let presentation = self.identity.fresh_presentation().await?;
            let reply = self
                .transport
                .fetch_page(&remote, "node", Some(&presentation))
                .await?;
            self.reject_loopback(&remote, &reply.node_id)?;
            (reply.address, reply.node_id, now())
        };

        overwrite_first_party(&mut address, target);
        address.last_successful_ping = pinged_at;
        debug!(peer = %remote, node_id = %node_id, is_static, "Peer checked");

        Ok(Checked {
            address,
            node_id,
            is_static,
        })
    }

    fn reject_loopback(&self, remote: &AddressKey, node_id: &str) -> Result<()> {
        if node_id == self.identity.node_id() {
            debug!(peer = %remote, "Dialed ourselves");
            return Err(SyncError::SelfLoopback(remote.to_string()));
        }
        Ok(())
    }
}

/// How a peer was reached is never taken from its self-report. Local
/// bookkeeping carried by `dialed` survives.
pub fn overwrite_first_party(address: &mut Address, dialed: &Address) {
    address.location = dialed.location.clone();
    address.sublocation = dialed.sublocation.clone();
    address.port = dialed.port;
    address.location_type = location_type_of(&dialed.location);
    address.last_successful_sync = dialed.last_successful_sync;
}

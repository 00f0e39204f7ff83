//! Pulling endpoints from a checked peer

use std::time::Instant;

use tracing::{debug, info, warn};

use super::check::Checked;
use super::purgatory::Purgatory;
use super::report::SyncReport;
use super::Syncer;
use crate::api::{Address, AddressKey, Endpoint, EntityKind, Node, Response, Timestamp};
use crate::error::{Result, SyncError};
use crate::identity::now;
use crate::verify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Cached history via the endpoint index
    Get,
    /// Live delta since the checkpoint
    Post,
}

/// Endpoints to pull, in order: addresses first, then the content kinds
/// both wanted and advertised by the peer.
pub fn plan(lineup: &[Endpoint], supported: &[EntityKind]) -> Vec<Endpoint> {
    let mut out = Vec::new();
    if lineup.contains(&Endpoint::Addresses) {
        out.push(Endpoint::Addresses);
    }
    for endpoint in lineup {
        if let Endpoint::Content(kind) = endpoint {
            if supported.contains(kind) && !out.contains(endpoint) {
                out.push(*endpoint);
            }
        }
    }
    out
}

fn phases(endpoint: Endpoint, is_static: bool) -> &'static [Phase] {
    match (endpoint, is_static) {
        (_, true) => &[Phase::Get],
        (Endpoint::Addresses, false) => &[Phase::Post, Phase::Get],
        (Endpoint::Content(_), false) => &[Phase::Get, Phase::Post],
    }
}

/// Addresses learned from a peer's pages carry no liveness of ours.
pub(crate) fn third_party(mut address: Address) -> Address {
    address.last_successful_ping = 0;
    address.last_successful_sync = 0;
    address
}

impl Syncer {
    /// Full sync with one peer over the endpoints in `lineup`.
    pub async fn sync(&self, target: &Address, lineup: &[Endpoint]) -> Result<SyncReport> {
        let started = Instant::now();
        let remote = target.key();
        info!(peer = %remote, "Sync starting");

        let mut report = SyncReport {
            peer: remote.to_string(),
            started_at: now(),
            ..Default::default()
        };
        let result = self.run(target, lineup, &mut report).await;
        report.duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(
                    peer = %remote,
                    node_id = %report.node_id,
                    duration_ms = report.duration_ms,
                    received = ?report.received,
                    written = report.written,
                    rejected = report.rejected,
                    "Sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(peer = %remote, duration_ms = report.duration_ms, error = %e, "Sync failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        target: &Address,
        lineup: &[Endpoint],
        report: &mut SyncReport,
    ) -> Result<()> {
        let checked = self.check(target).await?;
        report.node_id = checked.node_id.clone();
        report.address_type = checked.address.address_type;

        let mut node = self
            .store
            .read_node(&checked.node_id)?
            .unwrap_or_else(|| Node::new(checked.node_id.clone()));
        let mut purgatory = Purgatory::new(self.event_horizon());
        let remote = target.key();

        for endpoint in plan(lineup, &checked.address.supported_kinds()) {
            if let Err(e) = self
                .pull_endpoint(&remote, &checked, endpoint, &mut node, &mut purgatory, report)
                .await
            {
                if e.aborts_sync() {
                    return Err(e);
                }
                warn!(peer = %remote, %endpoint, error = %e, "Endpoint pull failed, continuing");
                report.errors.push(format!("{}: {}", endpoint, e));
            }
        }

        let held = purgatory.len();
        let drained = purgatory.drain();
        if !drained.admitted.is_empty() {
            let metrics = self.store.batch_insert(&drained.admitted, &[])?;
            report.record_insert(&metrics);
        }
        report.purgatory_admitted = drained.admitted.len();
        report.purgatory_dropped = drained.dropped;
        if held > 0 {
            debug!(
                peer = %remote,
                admitted = report.purgatory_admitted,
                dropped = report.purgatory_dropped,
                "Purgatory reconciled"
            );
        }

        self.store.insert_node(&node)?;
        report.checkpoints = node.checkpoints.clone();

        let mut address = checked.address;
        address.last_successful_sync = now();
        self.store.insert_or_update_addresses(&[address])?;
        Ok(())
    }

    /// Pull one endpoint. Each phase that completes advances the checkpoint
    /// on its own, so a failing phase never undoes the other's progress.
    async fn pull_endpoint(
        &self,
        remote: &AddressKey,
        checked: &Checked,
        endpoint: Endpoint,
        node: &mut Node,
        purgatory: &mut Purgatory,
        report: &mut SyncReport,
    ) -> Result<()> {
        let since = node.last_checkin(endpoint.name());
        let limit = self.config.dispatch.address_limit;
        let mut failure = None;

        for &phase in phases(endpoint, checked.is_static) {
            let (response, error) = match self.fetch_phase(remote, endpoint, phase, since).await {
                Ok(response) => (Some(response), None),
                Err(SyncError::ConsecutiveMissesExceeded {
                    location,
                    misses,
                    partial,
                }) => {
                    // Keep what arrived but leave the checkpoint alone.
                    let mut partial = *partial;
                    partial.most_recent_source_timestamp = 0;
                    let error = SyncError::ConsecutiveMissesExceeded {
                        location,
                        misses,
                        partial: Box::default(),
                    };
                    (Some(partial), Some(error))
                }
                Err(e) if e.aborts_sync() => return Err(e),
                Err(e) => (None, Some(e)),
            };

            if let Some(response) = response {
                let (watermark, addresses) = self.ingest(response, endpoint, purgatory, report)?;
                if node.advance(endpoint.name(), watermark) {
                    self.store.insert_node(node)?;
                }
                if endpoint == Endpoint::Addresses && phase == Phase::Post && addresses >= limit {
                    debug!(peer = %remote, addresses, "Live addresses filled the quota, skipping GET");
                    break;
                }
            }
            if let Some(e) = error {
                debug!(peer = %remote, %endpoint, ?phase, error = %e, "Phase failed");
                failure = Some(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_phase(
        &self,
        remote: &AddressKey,
        endpoint: Endpoint,
        phase: Phase,
        since: Timestamp,
    ) -> Result<Response> {
        match phase {
            Phase::Get => self.transport.walk_endpoint(remote, endpoint, since).await,
            Phase::Post => {
                let request = self
                    .identity
                    .fresh_delta_request(&endpoint.path(), since)
                    .await?;
                self.transport
                    .walk_live(remote, endpoint, &request, since)
                    .await
            }
        }
    }

    /// Verify and store a pulled response. Returns its watermark and how
    /// many addresses arrived before truncation.
    fn ingest(
        &self,
        mut response: Response,
        endpoint: Endpoint,
        purgatory: &mut Purgatory,
        report: &mut SyncReport,
    ) -> Result<(Timestamp, usize)> {
        let arrived = response.body.addresses.len();
        let addresses = &mut response.body.addresses;
        addresses.sort_by(|a, b| b.last_online.cmp(&a.last_online));
        addresses.truncate(self.config.dispatch.address_limit);

        report.record_received(
            endpoint.name(),
            response.body.entity_count() + response.body.addresses.len(),
        );

        let (verified, rejected) =
            verify::verify_response(response, self.store.as_ref(), &self.config.pow);
        report.rejected += rejected;

        let addresses: Vec<Address> = verified
            .body
            .addresses
            .iter()
            .filter(|a| !a.location.is_empty())
            .cloned()
            .map(third_party)
            .collect();
        let entities: Vec<_> = verified
            .body
            .entities()
            .into_iter()
            .filter_map(|e| purgatory.intercept(e))
            .collect();

        let metrics = self.store.batch_insert(&entities, &addresses)?;
        purgatory.record_admitted(entities.iter().map(|e| e.fingerprint()));
        report.record_insert(&metrics);
        debug!(
            %endpoint,
            entities = entities.len(),
            addresses = addresses.len(),
            rejected,
            held = purgatory.len(),
            "Ingested response"
        );

        Ok((verified.most_recent_source_timestamp, arrived))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_puts_addresses_first_and_intersects() {
        let lineup = vec![
            Endpoint::Content(EntityKind::Post),
            Endpoint::Addresses,
            Endpoint::Content(EntityKind::Vote),
        ];
        let supported = vec![EntityKind::Post, EntityKind::Board];
        assert_eq!(
            plan(&lineup, &supported),
            vec![Endpoint::Addresses, Endpoint::Content(EntityKind::Post)]
        );
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(phases(Endpoint::Addresses, false), &[Phase::Post, Phase::Get]);
        assert_eq!(
            phases(Endpoint::Content(EntityKind::Post), false),
            &[Phase::Get, Phase::Post]
        );
        assert_eq!(phases(Endpoint::Addresses, true), &[Phase::Get]);
    }

    #[test]
    fn test_third_party_zeroes_liveness() {
        let mut a = Address::new("10.0.0.1", 1);
        a.last_successful_ping = 5;
        a.last_successful_sync = 6;
        let a = third_party(a);
        assert_eq!((a.last_successful_ping, a.last_successful_sync), (0, 0));
    }
}

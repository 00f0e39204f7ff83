//! Event horizon integration tests
//!
//! A store wrapper reports a scripted database size so the control loop
//! can be driven through pressure and relief.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aether_node::api::{Address, Entity, EntityKind, Key, Node, Response, Timestamp};
use aether_node::config::RetentionConfig;
use aether_node::eventhorizon::{EventHorizon, DAY};
use aether_node::store::{AddressFilter, InsertMetrics, ReadQuery, SqliteStore, Store};

use common::board;

const MB: u64 = 1024 * 1024;

fn now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as Timestamp
}

fn retention(max_db_size_mb: u64) -> RetentionConfig {
    RetentionConfig {
        max_db_size_mb,
        ..Default::default()
    }
}

/// Reports `size` bytes; every pass over the board table frees `freed`.
struct ScriptedStore {
    inner: SqliteStore,
    size: AtomicU64,
    freed: u64,
    cutoffs: Mutex<Vec<(EntityKind, Timestamp)>>,
}

impl ScriptedStore {
    fn new(size: u64, freed: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::open_in_memory(1000).unwrap(),
            size: AtomicU64::new(size),
            freed,
            cutoffs: Mutex::new(Vec::new()),
        })
    }

    fn cutoffs_for(&self, kind: EntityKind) -> Vec<Timestamp> {
        self.cutoffs
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, c)| *c)
            .collect()
    }
}

impl Store for ScriptedStore {
    fn read_addresses(&self, filter: &AddressFilter) -> anyhow::Result<Vec<Address>> {
        self.inner.read_addresses(filter)
    }
    fn insert_or_update_addresses(&self, addresses: &[Address]) -> anyhow::Result<()> {
        self.inner.insert_or_update_addresses(addresses)
    }
    fn record_inbound_address(&self, address: &Address) -> anyhow::Result<()> {
        self.inner.record_inbound_address(address)
    }
    fn read_node(&self, node_id: &str) -> anyhow::Result<Option<Node>> {
        self.inner.read_node(node_id)
    }
    fn insert_node(&self, node: &Node) -> anyhow::Result<()> {
        self.inner.insert_node(node)
    }
    fn batch_insert(&self, entities: &[Entity], addresses: &[Address]) -> anyhow::Result<InsertMetrics> {
        self.inner.batch_insert(entities, addresses)
    }
    fn read(&self, query: &ReadQuery) -> anyhow::Result<Response> {
        self.inner.read(query)
    }
    fn read_keys(&self, fingerprint: &str) -> anyhow::Result<Vec<Key>> {
        self.inner.read_keys(fingerprint)
    }
    fn contains(&self, fingerprint: &str) -> anyhow::Result<bool> {
        self.inner.contains(fingerprint)
    }
    fn prune(&self, kind: EntityKind, cutoff: Timestamp) -> anyhow::Result<usize> {
        self.cutoffs.lock().unwrap().push((kind, cutoff));
        if kind == EntityKind::Board {
            let size = self.size.load(Ordering::SeqCst);
            self.size.store(size.saturating_sub(self.freed), Ordering::SeqCst);
        }
        self.inner.prune(kind, cutoff)
    }
    fn size_bytes(&self) -> anyhow::Result<u64> {
        Ok(self.size.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Pressure and relief
// =============================================================================

#[test]
fn test_under_budget_rests_at_local_memory_cutoff() {
    let store = ScriptedStore::new(MB / 2, 0);
    let horizon = EventHorizon::new(store.clone(), retention(1));
    let now = now();

    let outcome = horizon.prune_at(now).unwrap();
    let local_cutoff = now - 180 * DAY;
    assert_eq!(outcome.horizon, local_cutoff);
    assert_eq!(outcome.steps, 0);
    assert_eq!(horizon.current(), local_cutoff);
}

#[test]
fn test_pressure_steps_one_day_at_a_time_until_relieved() {
    // Over budget by just under three passes' worth.
    let store = ScriptedStore::new(MB + 5, 2);
    let horizon = EventHorizon::new(store.clone(), retention(1));
    let now = now();
    let local_cutoff = now - 180 * DAY;

    let outcome = horizon.prune_at(now).unwrap();

    // One pass at the local memory cutoff, then one per step.
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.horizon, local_cutoff + 2 * DAY);
    let boards = store.cutoffs_for(EntityKind::Board);
    assert_eq!(boards, vec![local_cutoff, local_cutoff + DAY, local_cutoff + 2 * DAY]);
    for pair in boards.windows(2) {
        assert!(pair[1] - pair[0] <= DAY);
    }
}

#[test]
fn test_sustained_pressure_stops_at_network_head() {
    let store = ScriptedStore::new(10 * MB, 0);
    let horizon = EventHorizon::new(store.clone(), retention(1));
    let now = now();
    let local_cutoff = now - 180 * DAY;

    let outcome = horizon.prune_at(now).unwrap();
    assert_eq!(outcome.steps, 180 - 14);
    assert_eq!(outcome.horizon, now - 14 * DAY);
    assert!(outcome.horizon >= local_cutoff);

    // Still over budget: nothing further to give.
    let again = horizon.prune_at(now).unwrap();
    assert_eq!(again.steps, 0);
    assert_eq!(again.horizon, now - 14 * DAY);
}

#[test]
fn test_relief_relaxes_in_one_pass() {
    let store = ScriptedStore::new(MB + 5, 2);
    let horizon = EventHorizon::new(store.clone(), retention(1));
    let now = now();

    let pressured = horizon.prune_at(now).unwrap();
    assert!(pressured.horizon > now - 180 * DAY);

    store.size.store(0, Ordering::SeqCst);
    let relaxed = horizon.prune_at(now).unwrap();
    assert_eq!(relaxed.horizon, now - 180 * DAY);
}

#[test]
fn test_votes_use_their_own_cutoff() {
    let store = ScriptedStore::new(0, 0);
    let horizon = EventHorizon::new(store.clone(), retention(1));
    let now = now();

    horizon.prune_at(now).unwrap();
    assert_eq!(store.cutoffs_for(EntityKind::Vote), vec![now - 14 * DAY]);
    assert_eq!(store.cutoffs_for(EntityKind::Post), vec![now - 180 * DAY]);
}

// =============================================================================
// Real store
// =============================================================================

#[test]
fn test_prune_removes_unreferenced_content_and_keeps_addresses() {
    let store = Arc::new(SqliteStore::open_in_memory(1000).unwrap());
    let now = now();
    let ancient = board("ancient", now - 200 * DAY);
    let recent = board("recent", now - DAY);
    store
        .batch_insert(
            &[ancient.clone(), recent.clone()],
            &[Address::new("10.0.0.1", 4000)],
        )
        .unwrap();

    let horizon = EventHorizon::new(store.clone(), retention(10_000));
    let outcome = horizon.prune_at(now).unwrap();

    assert_eq!(outcome.removed, 1);
    assert!(!store.contains(ancient.fingerprint()).unwrap());
    assert!(store.contains(recent.fingerprint()).unwrap());
    assert_eq!(store.read_addresses(&AddressFilter::default()).unwrap().len(), 1);
}

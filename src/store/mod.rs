//! Local persistence
//!
//! The sync engine talks to storage only through [`Store`]. It verifies
//! before it writes, so implementations take whatever they are handed and
//! apply last-write-wins on updateable kinds.

mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::api::{Address, Entity, EntityKind, Fingerprint, Key, Node, Response, Timestamp};

/// Ordering for address reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressOrder {
    /// Most recently reachable first
    #[default]
    Freshest,
    /// Least recently pinged first
    Stalest,
}

#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    pub address_type: Option<u8>,
    pub order: AddressOrder,
    pub limit: Option<usize>,
}

impl AddressFilter {
    pub fn of_type(address_type: u8) -> Self {
        Self {
            address_type: Some(address_type),
            ..Default::default()
        }
    }
}

/// Entity read by kind, optionally narrowed to fingerprints and a
/// `max(creation, last_update)` window. `embeds` pulls in entities of other
/// kinds whose ancestor is in the result.
#[derive(Debug, Clone)]
pub struct ReadQuery {
    pub kind: EntityKind,
    pub fingerprints: Vec<Fingerprint>,
    pub embeds: Vec<EntityKind>,
    pub start: Timestamp,
    /// Zero means open ended
    pub end: Timestamp,
}

impl ReadQuery {
    pub fn kind(kind: EntityKind) -> Self {
        Self {
            kind,
            fingerprints: Vec::new(),
            embeds: Vec::new(),
            start: 0,
            end: 0,
        }
    }
}

/// What a batch insert did, per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertMetrics {
    pub inserted: BTreeMap<EntityKind, usize>,
    pub updated: BTreeMap<EntityKind, usize>,
    /// Entities already present and not newer than the stored copy
    pub unchanged: usize,
    /// Third-party addresses that were new to us
    pub addresses_added: usize,
}

impl InsertMetrics {
    pub fn total_written(&self) -> usize {
        self.inserted.values().sum::<usize>() + self.updated.values().sum::<usize>()
    }
}

/// Read/write contract the sync engine consumes.
pub trait Store: Send + Sync {
    fn read_addresses(&self, filter: &AddressFilter) -> Result<Vec<Address>>;

    /// First-party write: replace what we know about these addresses.
    /// Liveness timestamps never move backwards.
    fn insert_or_update_addresses(&self, addresses: &[Address]) -> Result<()>;

    /// Second-party write from an inbound caller. Only location, port and
    /// `last_successful_ping` are taken; an existing record keeps the rest.
    fn record_inbound_address(&self, address: &Address) -> Result<()>;

    fn read_node(&self, node_id: &str) -> Result<Option<Node>>;

    fn insert_node(&self, node: &Node) -> Result<()>;

    /// Persist verified entities plus third-party addresses. Addresses are
    /// insert-or-ignore with their liveness zeroed.
    fn batch_insert(&self, entities: &[Entity], addresses: &[Address]) -> Result<InsertMetrics>;

    fn read(&self, query: &ReadQuery) -> Result<Response>;

    fn read_keys(&self, fingerprint: &str) -> Result<Vec<Key>>;

    /// Whether any kind holds this fingerprint.
    fn contains(&self, fingerprint: &str) -> Result<bool>;

    /// Delete entities of `kind` last referenced before `cutoff`.
    fn prune(&self, kind: EntityKind, cutoff: Timestamp) -> Result<usize>;

    /// Bytes in use by live data.
    fn size_bytes(&self) -> Result<u64>;
}

//! Holding area for out-of-window entities
//!
//! Content older than the event horizon is only admitted when the entity it
//! hangs off (a post's thread, a thread's board, a vote's or truststate's
//! target) arrives in the same sync. Until the end of the sync it waits here.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::api::{Entity, Fingerprint, Timestamp};

#[derive(Debug, Clone)]
struct PurgatoryEntry {
    entity: Entity,
    ancestor: Fingerprint,
}

#[derive(Debug, Default)]
pub struct Purgatory {
    horizon: Timestamp,
    held: BTreeMap<Fingerprint, PurgatoryEntry>,
    admitted: HashSet<Fingerprint>,
}

/// Result of draining the purgatory.
#[derive(Debug, Default)]
pub struct Drained {
    pub admitted: Vec<Entity>,
    pub dropped: usize,
}

impl Purgatory {
    pub fn new(horizon: Timestamp) -> Self {
        Self {
            horizon,
            ..Default::default()
        }
    }

    /// Hold the entity if it is out of window and depends on an ancestor.
    /// Returns it back when it may be written straight away.
    pub fn intercept(&mut self, entity: Entity) -> Option<Entity> {
        let ancestor = match entity.ancestor() {
            Some(a) if entity.last_timestamp() < self.horizon => a.to_string(),
            _ => return Some(entity),
        };
        self.held.insert(
            entity.fingerprint().to_string(),
            PurgatoryEntry { entity, ancestor },
        );
        None
    }

    /// Note entities that were written during this sync.
    pub fn record_admitted<'a>(&mut self, fingerprints: impl IntoIterator<Item = &'a str>) {
        self.admitted
            .extend(fingerprints.into_iter().map(str::to_string));
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release every held entity whose ancestor was admitted during this
    /// sync, repeating until nothing more is released. The rest is dropped.
    pub fn drain(mut self) -> Drained {
        let mut out = Drained::default();
        loop {
            let mut released = Vec::new();
            for (fp, entry) in &self.held {
                if self.admitted.contains(&entry.ancestor) {
                    released.push(fp.clone());
                }
            }
            if released.is_empty() {
                break;
            }
            for fp in released {
                if let Some(entry) = self.held.remove(&fp) {
                    self.admitted.insert(fp);
                    out.admitted.push(entry.entity);
                }
            }
        }
        out.dropped = self.held.len();
        if out.dropped > 0 {
            debug!(dropped = out.dropped, "Dropped entities with unknown ancestors");
        }
        out
    }
}

//! Per-peer checkpoints

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::entity::Timestamp;

/// Sync bookkeeping for one remote node, keyed by its node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    /// Endpoint name to last checkin (high-water mark already pulled)
    pub checkpoints: BTreeMap<String, Timestamp>,
}

impl Node {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            checkpoints: BTreeMap::new(),
        }
    }

    pub fn last_checkin(&self, endpoint: &str) -> Timestamp {
        self.checkpoints.get(endpoint).copied().unwrap_or(0)
    }

    /// Move the checkpoint forward. Returns whether it moved; it never
    /// moves back.
    pub fn advance(&mut self, endpoint: &str, ts: Timestamp) -> bool {
        let current = self.last_checkin(endpoint);
        if ts > current {
            self.checkpoints.insert(endpoint.to_string(), ts);
            true
        } else {
            false
        }
    }
}

//! Page envelope and merged responses

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::address::Address;
use super::entity::{
    Board, Entity, EntityKind, Fingerprint, Key, Post, Thread, Timestamp, Truststate, Vote,
};

/// One cache of an endpoint: a time window served as numbered pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultCache {
    pub response_url: String,
    pub starts_from: Timestamp,
    pub ends_at: Timestamp,
}

impl ResultCache {
    /// Half-open window membership.
    pub fn covers(&self, ts: Timestamp) -> bool {
        self.starts_from <= ts && ts < self.ends_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub pages: u64,
    pub current_page: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caching {
    pub served_from_cache: bool,
    pub current_cache_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: String,
    pub values: Vec<String>,
}

impl Filter {
    /// Everything newer than `since`, open ended.
    pub fn since(since: Timestamp) -> Self {
        Self {
            filter_type: "timestamp".to_string(),
            values: vec![since.to_string(), "0".to_string()],
        }
    }
}

/// Index entry: where in a cache an entity lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    pub creation: Timestamp,
    pub last_update: Timestamp,
    pub page_number: u64,
}

/// Body of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Answer {
    pub boards: Vec<Board>,
    pub threads: Vec<Thread>,
    pub posts: Vec<Post>,
    pub votes: Vec<Vote>,
    pub keys: Vec<Key>,
    pub truststates: Vec<Truststate>,
    pub addresses: Vec<Address>,
    pub boards_index: Vec<IndexEntry>,
    pub threads_index: Vec<IndexEntry>,
    pub posts_index: Vec<IndexEntry>,
    pub votes_index: Vec<IndexEntry>,
    pub keys_index: Vec<IndexEntry>,
    pub truststates_index: Vec<IndexEntry>,
}

impl Answer {
    pub fn index(&self, kind: EntityKind) -> &[IndexEntry] {
        match kind {
            EntityKind::Board => &self.boards_index,
            EntityKind::Thread => &self.threads_index,
            EntityKind::Post => &self.posts_index,
            EntityKind::Vote => &self.votes_index,
            EntityKind::Key => &self.keys_index,
            EntityKind::Truststate => &self.truststates_index,
        }
    }

    pub fn index_mut(&mut self, kind: EntityKind) -> &mut Vec<IndexEntry> {
        match kind {
            EntityKind::Board => &mut self.boards_index,
            EntityKind::Thread => &mut self.threads_index,
            EntityKind::Post => &mut self.posts_index,
            EntityKind::Vote => &mut self.votes_index,
            EntityKind::Key => &mut self.keys_index,
            EntityKind::Truststate => &mut self.truststates_index,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.boards.len()
            + self.threads.len()
            + self.posts.len()
            + self.votes.len()
            + self.keys.len()
            + self.truststates.len()
    }

    /// Concatenate another body into this one, field by field.
    pub fn append(&mut self, mut other: Answer) {
        self.boards.append(&mut other.boards);
        self.threads.append(&mut other.threads);
        self.posts.append(&mut other.posts);
        self.votes.append(&mut other.votes);
        self.keys.append(&mut other.keys);
        self.truststates.append(&mut other.truststates);
        self.addresses.append(&mut other.addresses);
        for kind in EntityKind::ALL {
            let mut idx = std::mem::take(other.index_mut(kind));
            self.index_mut(kind).append(&mut idx);
        }
    }

    /// All entities in the body, in kind order.
    pub fn entities(&self) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.entity_count());
        out.extend(self.boards.iter().cloned().map(Entity::Board));
        out.extend(self.threads.iter().cloned().map(Entity::Thread));
        out.extend(self.posts.iter().cloned().map(Entity::Post));
        out.extend(self.votes.iter().cloned().map(Entity::Vote));
        out.extend(self.keys.iter().cloned().map(Entity::Key));
        out.extend(self.truststates.iter().cloned().map(Entity::Truststate));
        out
    }

    pub fn push(&mut self, entity: Entity) {
        match entity {
            Entity::Board(e) => self.boards.push(e),
            Entity::Thread(e) => self.threads.push(e),
            Entity::Post(e) => self.posts.push(e),
            Entity::Vote(e) => self.votes.push(e),
            Entity::Key(e) => self.keys.push(e),
            Entity::Truststate(e) => self.truststates.push(e),
        }
    }

    pub fn find(&self, kind: EntityKind, fingerprint: &str) -> Option<Entity> {
        self.entities()
            .into_iter()
            .find(|e| e.kind() == kind && e.fingerprint() == fingerprint)
    }
}

/// Page envelope served by a remote. Every page is signed by the serving
/// node; `node_id` is derived locally from `node_public_key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiResponse {
    pub node_id: String,
    pub node_public_key: String,
    pub signature: String,
    /// Present on pages that present the sender, e.g. POST /node
    pub proof_of_work: String,
    pub nonce: String,
    pub address: Address,
    pub entity: String,
    pub endpoint: String,
    pub filters: Vec<Filter>,
    pub timestamp: Timestamp,
    pub starts_from: Timestamp,
    pub ends_at: Timestamp,
    pub pagination: Pagination,
    pub caching: Caching,
    pub results: Vec<ResultCache>,
    pub response: Answer,
}

/// Accumulation of one or more pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub body: Answer,
    /// Cache links returned by an endpoint index or a POST reply
    pub cache_links: Vec<ResultCache>,
    /// Newest page timestamp seen; the checkpoint candidate
    pub most_recent_source_timestamp: Timestamp,
}

impl Response {
    /// Fold a page into the accumulation.
    pub fn absorb_page(&mut self, page: ApiResponse) {
        self.body.append(page.response);
        self.cache_links.extend(page.results);
        self.most_recent_source_timestamp =
            self.most_recent_source_timestamp.max(page.timestamp);
    }

    /// Concatenate another accumulation into this one.
    pub fn merge(&mut self, other: Response) {
        self.body.append(other.body);
        self.cache_links.extend(other.cache_links);
        self.most_recent_source_timestamp = self
            .most_recent_source_timestamp
            .max(other.most_recent_source_timestamp);
    }

    pub fn is_empty(&self) -> bool {
        self.body.entity_count() == 0 && self.body.addresses.is_empty()
    }

    /// Per-kind entity counts plus addresses, for reporting.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        let b = &self.body;
        for (name, n) in [
            ("boards", b.boards.len()),
            ("threads", b.threads.len()),
            ("posts", b.posts.len()),
            ("votes", b.votes.len()),
            ("keys", b.keys.len()),
            ("truststates", b.truststates.len()),
            ("addresses", b.addresses.len()),
        ] {
            if n > 0 {
                counts.insert(name, n);
            }
        }
        counts
    }
}

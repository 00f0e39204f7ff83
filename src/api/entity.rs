//! Provable entities
//!
//! The six content kinds share a provable field set (fingerprint, creation,
//! proof of work, signature). Boards, votes, keys and truststates also carry
//! an updateable field set; threads and posts are immutable once posted.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Fingerprint = String;
pub type Timestamp = i64;

/// Closed set of content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Board,
    Thread,
    Post,
    Vote,
    Key,
    Truststate,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Board,
        EntityKind::Thread,
        EntityKind::Post,
        EntityKind::Vote,
        EntityKind::Key,
        EntityKind::Truststate,
    ];

    /// Plural name used for endpoints, response fields and checkpoints.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Board => "boards",
            EntityKind::Thread => "threads",
            EntityKind::Post => "posts",
            EntityKind::Vote => "votes",
            EntityKind::Key => "keys",
            EntityKind::Truststate => "truststates",
        }
    }

    pub fn from_plural(name: &str) -> Option<Self> {
        EntityKind::ALL.into_iter().find(|k| k.plural() == name)
    }

    /// Threads and posts cannot be edited after creation.
    pub fn is_updateable(&self) -> bool {
        !matches!(self, EntityKind::Thread | EntityKind::Post)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// A remote endpoint a sync pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Addresses,
    Content(EntityKind),
}

impl Endpoint {
    /// Name used for checkpoints and lineups.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Addresses => "addresses",
            Endpoint::Content(kind) => kind.plural(),
        }
    }

    /// Path relative to the `v0` root.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Addresses => "addresses".to_string(),
            Endpoint::Content(kind) => format!("c0/{}", kind.plural()),
        }
    }

    /// Addresses followed by every content kind.
    pub fn all() -> Vec<Endpoint> {
        std::iter::once(Endpoint::Addresses)
            .chain(EntityKind::ALL.into_iter().map(Endpoint::Content))
            .collect()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        if name == "addresses" {
            return Some(Endpoint::Addresses);
        }
        EntityKind::from_plural(name).map(Endpoint::Content)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provable {
    pub fingerprint: Fingerprint,
    pub creation: Timestamp,
    pub proof_of_work: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Updateable {
    pub last_update: Timestamp,
    pub update_proof_of_work: String,
    pub update_signature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardOwner {
    pub key_fingerprint: Fingerprint,
    pub expiry: Timestamp,
    pub level: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Board {
    #[serde(flatten)]
    pub provable: Provable,
    #[serde(flatten)]
    pub update: Updateable,
    pub name: String,
    pub board_owners: Vec<BoardOwner>,
    pub description: String,
    pub owner: Fingerprint,
    pub meta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thread {
    #[serde(flatten)]
    pub provable: Provable,
    pub board: Fingerprint,
    pub name: String,
    pub body: String,
    pub link: String,
    pub owner: Fingerprint,
    pub meta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    #[serde(flatten)]
    pub provable: Provable,
    pub board: Fingerprint,
    pub thread: Fingerprint,
    pub parent: Fingerprint,
    pub body: String,
    pub owner: Fingerprint,
    pub meta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vote {
    #[serde(flatten)]
    pub provable: Provable,
    #[serde(flatten)]
    pub update: Updateable,
    pub board: Fingerprint,
    pub thread: Fingerprint,
    pub target: Fingerprint,
    pub owner: Fingerprint,
    #[serde(rename = "type")]
    pub vote_type: i32,
    pub meta: String,
}

/// A public key entity. Its owner is itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Key {
    #[serde(flatten)]
    pub provable: Provable,
    #[serde(flatten)]
    pub update: Updateable,
    #[serde(rename = "type")]
    pub key_type: String,
    /// Hex encoded ed25519 public key
    pub key: String,
    pub name: String,
    pub info: String,
    pub meta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Truststate {
    #[serde(flatten)]
    pub provable: Provable,
    #[serde(flatten)]
    pub update: Updateable,
    pub target: Fingerprint,
    pub owner: Fingerprint,
    #[serde(rename = "type")]
    pub trust_type: i32,
    pub domains: Vec<Fingerprint>,
    pub expiry: Timestamp,
    pub meta: String,
}

/// Which seal a canonical serialization is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seal {
    Fingerprint,
    Signature,
    ProofOfWork,
    UpdateSignature,
    UpdateProofOfWork,
}

/// Any of the six provable kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Board(Board),
    Thread(Thread),
    Post(Post),
    Vote(Vote),
    Key(Key),
    Truststate(Truststate),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Board(_) => EntityKind::Board,
            Entity::Thread(_) => EntityKind::Thread,
            Entity::Post(_) => EntityKind::Post,
            Entity::Vote(_) => EntityKind::Vote,
            Entity::Key(_) => EntityKind::Key,
            Entity::Truststate(_) => EntityKind::Truststate,
        }
    }

    pub fn provable(&self) -> &Provable {
        match self {
            Entity::Board(e) => &e.provable,
            Entity::Thread(e) => &e.provable,
            Entity::Post(e) => &e.provable,
            Entity::Vote(e) => &e.provable,
            Entity::Key(e) => &e.provable,
            Entity::Truststate(e) => &e.provable,
        }
    }

    pub fn provable_mut(&mut self) -> &mut Provable {
        match self {
            Entity::Board(e) => &mut e.provable,
            Entity::Thread(e) => &mut e.provable,
            Entity::Post(e) => &mut e.provable,
            Entity::Vote(e) => &mut e.provable,
            Entity::Key(e) => &mut e.provable,
            Entity::Truststate(e) => &mut e.provable,
        }
    }

    pub fn updateable(&self) -> Option<&Updateable> {
        match self {
            Entity::Board(e) => Some(&e.update),
            Entity::Vote(e) => Some(&e.update),
            Entity::Key(e) => Some(&e.update),
            Entity::Truststate(e) => Some(&e.update),
            Entity::Thread(_) | Entity::Post(_) => None,
        }
    }

    pub fn updateable_mut(&mut self) -> Option<&mut Updateable> {
        match self {
            Entity::Board(e) => Some(&mut e.update),
            Entity::Vote(e) => Some(&mut e.update),
            Entity::Key(e) => Some(&mut e.update),
            Entity::Truststate(e) => Some(&mut e.update),
            Entity::Thread(_) | Entity::Post(_) => None,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.provable().fingerprint
    }

    pub fn creation(&self) -> Timestamp {
        self.provable().creation
    }

    pub fn last_update(&self) -> Timestamp {
        self.updateable().map(|u| u.last_update).unwrap_or(0)
    }

    /// Newest timestamp the entity carries.
    pub fn last_timestamp(&self) -> Timestamp {
        self.creation().max(self.last_update())
    }

    /// Whether the update seal must be checked instead of the creation seal.
    /// A non-zero `last_update` is only covered by the update seal, so it
    /// counts as an update even when the update seal is missing.
    pub fn is_updated(&self) -> bool {
        self.updateable()
            .map(|u| {
                u.last_update != 0
                    || !u.update_signature.is_empty()
                    || !u.update_proof_of_work.is_empty()
            })
            .unwrap_or(false)
    }

    /// Fingerprint of the key that must have signed this entity. Empty for
    /// anonymous entities. A key owns itself.
    pub fn owner(&self) -> &str {
        match self {
            Entity::Board(e) => &e.owner,
            Entity::Thread(e) => &e.owner,
            Entity::Post(e) => &e.owner,
            Entity::Vote(e) => &e.owner,
            Entity::Key(e) => &e.provable.fingerprint,
            Entity::Truststate(e) => &e.owner,
        }
    }

    /// Entity that must be known before this one may be admitted out of
    /// window: post to thread, thread to board, vote and truststate to
    /// their target.
    pub fn ancestor(&self) -> Option<&str> {
        let fp = match self {
            Entity::Thread(e) => &e.board,
            Entity::Post(e) => &e.thread,
            Entity::Vote(e) => &e.target,
            Entity::Truststate(e) => &e.target,
            Entity::Board(_) | Entity::Key(_) => return None,
        };
        if fp.is_empty() {
            None
        } else {
            Some(fp.as_str())
        }
    }

    /// Entities whose retention is refreshed when this one arrives.
    pub fn referenced(&self) -> Vec<&str> {
        let refs: Vec<&str> = match self {
            Entity::Thread(e) => vec![e.board.as_str()],
            Entity::Post(e) => vec![e.board.as_str(), e.thread.as_str(), e.parent.as_str()],
            Entity::Vote(e) => vec![e.board.as_str(), e.thread.as_str(), e.target.as_str()],
            Entity::Truststate(e) => vec![e.target.as_str()],
            Entity::Board(_) | Entity::Key(_) => vec![],
        };
        refs.into_iter().filter(|fp| !fp.is_empty()).collect()
    }

    /// Canonical serialization of this entity for the given seal.
    pub fn sealing_input(&self, seal: Seal) -> String {
        let mut copy = self.clone();
        copy.blank_for(seal);
        copy.to_json_string()
    }

    fn blank_for(&mut self, seal: Seal) {
        match seal {
            Seal::Fingerprint => {
                self.provable_mut().fingerprint.clear();
                if let Some(u) = self.updateable_mut() {
                    *u = Updateable::default();
                }
                self.blank_mutable_payload();
            }
            Seal::Signature => {
                let p = self.provable_mut();
                p.fingerprint.clear();
                p.proof_of_work.clear();
                p.signature.clear();
                if let Some(u) = self.updateable_mut() {
                    *u = Updateable::default();
                }
            }
            Seal::ProofOfWork => {
                let p = self.provable_mut();
                p.fingerprint.clear();
                p.proof_of_work.clear();
                if let Some(u) = self.updateable_mut() {
                    *u = Updateable::default();
                }
            }
            Seal::UpdateSignature => {
                if let Some(u) = self.updateable_mut() {
                    u.update_signature.clear();
                    u.update_proof_of_work.clear();
                }
            }
            Seal::UpdateProofOfWork => {
                if let Some(u) = self.updateable_mut() {
                    u.update_proof_of_work.clear();
                }
            }
        }
    }

    /// Fields an update may change; they stay out of the fingerprint.
    fn blank_mutable_payload(&mut self) {
        match self {
            Entity::Board(e) => {
                e.board_owners.clear();
                e.description.clear();
                e.meta.clear();
            }
            Entity::Vote(e) => {
                e.vote_type = 0;
                e.meta.clear();
            }
            Entity::Key(e) => {
                e.info.clear();
                e.meta.clear();
            }
            Entity::Truststate(e) => {
                e.trust_type = 0;
                e.domains.clear();
                e.expiry = 0;
                e.meta.clear();
            }
            Entity::Thread(_) | Entity::Post(_) => {}
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            Entity::Board(e) => serde_json::to_value(e),
            Entity::Thread(e) => serde_json::to_value(e),
            Entity::Post(e) => serde_json::to_value(e),
            Entity::Vote(e) => serde_json::to_value(e),
            Entity::Key(e) => serde_json::to_value(e),
            Entity::Truststate(e) => serde_json::to_value(e),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn to_json_string(&self) -> String {
        let s = match self {
            Entity::Board(e) => serde_json::to_string(e),
            Entity::Thread(e) => serde_json::to_string(e),
            Entity::Post(e) => serde_json::to_string(e),
            Entity::Vote(e) => serde_json::to_string(e),
            Entity::Key(e) => serde_json::to_string(e),
            Entity::Truststate(e) => serde_json::to_string(e),
        };
        s.unwrap_or_default()
    }

    pub fn from_json(kind: EntityKind, data: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Board => Entity::Board(serde_json::from_str(data)?),
            EntityKind::Thread => Entity::Thread(serde_json::from_str(data)?),
            EntityKind::Post => Entity::Post(serde_json::from_str(data)?),
            EntityKind::Vote => Entity::Vote(serde_json::from_str(data)?),
            EntityKind::Key => Entity::Key(serde_json::from_str(data)?),
            EntityKind::Truststate => Entity::Truststate(serde_json::from_str(data)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Board {
        Board {
            provable: Provable {
                fingerprint: "fp".into(),
                creation: 100,
                proof_of_work: "pow".into(),
                signature: "sig".into(),
            },
            update: Updateable {
                last_update: 200,
                update_proof_of_work: "upow".into(),
                update_signature: "usig".into(),
            },
            name: "rust".into(),
            description: "systems".into(),
            owner: "owner-fp".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = Entity::Board(board()).to_json();
        assert_eq!(json["fingerprint"], "fp");
        assert_eq!(json["last_update"], 200);
        assert_eq!(json["board_owners"], serde_json::json!([]));

        let vote = Entity::Vote(Vote {
            vote_type: 1,
            ..Default::default()
        });
        assert_eq!(vote.to_json()["type"], 1);
    }

    #[test]
    fn test_fingerprint_input_ignores_mutable_fields() {
        let original = Entity::Board(board());
        let mut edited = board();
        edited.description = "changed".into();
        edited.update.last_update = 999;
        let edited = Entity::Board(edited);

        assert_eq!(
            original.sealing_input(Seal::Fingerprint),
            edited.sealing_input(Seal::Fingerprint)
        );
        assert_ne!(
            original.sealing_input(Seal::Signature),
            edited.sealing_input(Seal::Signature)
        );
    }

    #[test]
    fn test_proof_of_work_input_covers_signature() {
        let input = Entity::Board(board()).sealing_input(Seal::ProofOfWork);
        assert!(input.contains("\"signature\":\"sig\""));
        assert!(input.contains("\"proof_of_work\":\"\""));
    }

    #[test]
    fn test_key_owns_itself() {
        let key = Entity::Key(Key {
            provable: Provable {
                fingerprint: "key-fp".into(),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(key.owner(), "key-fp");
        assert!(key.ancestor().is_none());
    }

    #[test]
    fn test_ancestors() {
        let post = Entity::Post(Post {
            thread: "t".into(),
            board: "b".into(),
            ..Default::default()
        });
        assert_eq!(post.ancestor(), Some("t"));
        assert_eq!(post.referenced(), vec!["b", "t"]);

        let orphan_thread = Entity::Thread(Thread::default());
        assert!(orphan_thread.ancestor().is_none());
    }

    #[test]
    fn test_endpoint_names() {
        assert_eq!(Endpoint::Content(EntityKind::Truststate).path(), "c0/truststates");
        assert_eq!(Endpoint::from_name("addresses"), Some(Endpoint::Addresses));
        assert_eq!(
            Endpoint::from_name("votes"),
            Some(Endpoint::Content(EntityKind::Vote))
        );
        assert_eq!(Endpoint::from_name("nope"), None);
    }
}

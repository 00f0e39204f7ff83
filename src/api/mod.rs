//! Wire types shared by every component
//!
//! - Provable entities and the closed set of their kinds
//! - Peer addresses
//! - The signed page envelope and page accumulation
//! - Per-peer checkpoints

pub mod address;
pub mod entity;
pub mod node;
pub mod response;

pub use address::{address_type, location_type, Address, AddressKey, Client, Protocol, Subprotocol};
pub use entity::{
    Board, BoardOwner, Endpoint, Entity, EntityKind, Fingerprint, Key, Post, Provable, Seal,
    Thread, Timestamp, Truststate, Updateable, Vote,
};
pub use node::Node;
pub use response::{
    Answer, ApiResponse, Caching, Filter, IndexEntry, Pagination, Response, ResultCache,
};

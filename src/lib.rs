//! aether-node: peer synchronization engine for the Aether content network
//!
//! A node keeps a local copy of a public, signed content graph (boards,
//! threads, posts, votes, keys, truststates) and reconciles it pairwise
//! with peers:
//!
//! - [`dispatch`] picks a peer and when to sync with it
//! - [`sync`] runs one sync: handshake, then per-endpoint pulls
//! - [`transport`] walks a peer's paginated caches over HTTP
//! - [`verify`] decides what is trustworthy before anything is stored
//! - [`eventhorizon`] prunes old content to keep the store under budget
//! - [`inbound`] answers other peers' handshakes

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eventhorizon;
pub mod identity;
pub mod inbound;
pub mod store;
pub mod sync;
pub mod transport;
pub mod verify;

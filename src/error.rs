//! Error types for aether-node

use thiserror::Error;

use crate::api::Response;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures surfaced by transport, sync and dispatch.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Timeout, refused or reset connection. Not retried within the cycle.
    #[error("Peer offline at {host}:{port}: {reason}")]
    PeerOffline {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Remote node {0} is this node")]
    SelfLoopback(String),

    /// Undecodable or badly signed page.
    #[error("Malformed response from {host}:{port}/{path}: {reason}")]
    MalformedResponse {
        host: String,
        port: u16,
        path: String,
        reason: String,
    },

    #[error("HTTP {status} from {host}:{port}/{path}")]
    Http {
        status: u16,
        host: String,
        port: u16,
        path: String,
    },

    #[error("Verification failed: {0}")]
    VerificationFailed(VerifyError),

    /// Pagination gave up; whatever was collected before is in `partial`.
    #[error("{misses} consecutive misses while walking {location}")]
    ConsecutiveMissesExceeded {
        location: String,
        misses: u32,
        partial: Box<Response>,
    },

    #[error("Store corruption: {0}")]
    StoreCorruption(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking task such as page stamping panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(String),

    /// The peer was synced too recently and is still on cooldown.
    #[error("Peer {0} is cooling down")]
    CoolingDown(String),
}

impl SyncError {
    /// Whether the remote looked unreachable rather than misbehaving.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::PeerOffline { .. })
    }

    /// Whether the failure ends the whole sync rather than one endpoint.
    pub fn aborts_sync(&self) -> bool {
        matches!(
            self,
            SyncError::PeerOffline { .. }
                | SyncError::SelfLoopback(_)
                | SyncError::Store(_)
                | SyncError::StoreCorruption(_)
                | SyncError::Task(_)
        )
    }

    /// Whether the failure is a missing page or cache the walkers may skip.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            SyncError::Http { .. } | SyncError::MalformedResponse { .. }
        )
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Store(format!("{:#}", e))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

impl From<VerifyError> for SyncError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::StoreCorruption(msg) => SyncError::StoreCorruption(msg),
            other => SyncError::VerificationFailed(other),
        }
    }
}

/// Reasons a single entity is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("Fingerprint invalid: {0}")]
    FingerprintInvalid(String),

    #[error("Proof of work invalid for {fingerprint}: {reason}")]
    ProofOfWorkInvalid { fingerprint: String, reason: String },

    #[error("Wrong key provided for {fingerprint}: owner {owner}, key {key}")]
    WrongKeyProvided {
        fingerprint: String,
        owner: String,
        key: String,
    },

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A key shipped in the response failed its own verification.
    #[error("Key {0} failed verification")]
    KeyInvalid(String),

    /// A key already in the local store failed verification, or the store
    /// holds duplicates for one fingerprint.
    #[error("Store corruption: {0}")]
    StoreCorruption(String),

    #[error("Store error: {0}")]
    Store(String),
}
